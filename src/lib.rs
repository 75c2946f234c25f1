//! # RustyMIL: bag datasets for multiple-instance learning
//!
//! Each dataset item is a **bag** of instance images with a single label:
//! a bag is positive when at least one of its instances is positive.
//!
//! Two sources are provided:
//! - [`data::MnistBags`]: synthetic bags of MNIST digits, positive when a
//!   target digit is present.
//! - [`data::ColonCancerBags`]: 27x27 nucleus patches cropped from H&E colon
//!   cancer images, positive when an epithelial nucleus is present.
//!
//! ## Usage Example
//!
//! ```no_run
//! use rustymil::data::{DataLoader, Dataset, MilDataset, MnistBags, MnistBagsConfig, MnistDigits};
//!
//! # fn main() -> rustymil::Result<()> {
//! // 1. Load all 70 000 digits
//! let digits = MnistDigits::load_all("data/mnist")?;
//!
//! // 2. Build the training bags of fold 0
//! let bags = MnistBags::new(&digits, MnistBagsConfig::default())?;
//! println!("{:?}", bags.stats());
//!
//! // 3. Iterate bags one at a time
//! let loader = DataLoader::new(bags, 1).shuffle(true);
//! for batch in loader.iter() {
//!     let bag = &batch.items[0].bag; // [n, 3, 28, 28]
//!     let _ = bag;
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod serialization;

pub use error::{DataError, Result};
