// --- Файл: src/main.rs ---

//! Утилита командной строки: строит датасет мешков, выводит статистику,
//! проходит одну эпоху и при необходимости экспортирует мешки.

use clap::{Parser, Subcommand};
use log::{debug, info, LevelFilter};
use rustymil::config::load_config;
use rustymil::data::{
    ColonBagsConfig, ColonCancerBags, DataLoader, MilDataset, MnistBags,
    MnistBagsConfig, MnistDigits, NucleusType, SubsetDataset,
};
use rustymil::serialization::export_bags;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Аргументы командной строки
#[derive(Parser, Debug)]
#[command(author, version, about = "RustyMIL: датасеты мешков для обучения с множественными экземплярами", long_about = None)]
struct Cli {
    /// Подробный вывод (уровень debug, RUST_LOG имеет приоритет)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Синтетические мешки из цифр MNIST
    Mnist(MnistArgs),
    /// Мешки патчей ядер из изображений рака толстой кишки
    Colon(ColonArgs),
}

#[derive(clap::Args, Debug)]
struct MnistArgs {
    /// Файл конфигурации (TOML или JSON)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Директория с IDX файлами MNIST
    #[arg(long, default_value = "data/mnist")]
    data_dir: PathBuf,
    #[arg(long)]
    fold_id: Option<usize>,
    #[arg(long)]
    target_number: Option<u8>,
    /// Строить тестовые мешки вместо обучающих
    #[arg(long)]
    test: bool,
    #[arg(long)]
    seed: Option<u64>,
    /// Директория для экспорта мешков
    #[arg(long)]
    export: Option<PathBuf>,
    /// Экспортировать только первые N мешков
    #[arg(long)]
    export_limit: Option<usize>,
}

#[derive(clap::Args, Debug)]
struct ColonArgs {
    /// Корневая директория изображений
    #[arg(long)]
    path: Option<PathBuf>,
    /// Файл конфигурации (TOML или JSON)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Индексы обучающих директорий через запятую
    #[arg(long, value_delimiter = ',')]
    train_idxs: Option<Vec<usize>>,
    /// Индексы тестовых директорий через запятую
    #[arg(long, value_delimiter = ',')]
    test_idxs: Option<Vec<usize>>,
    /// Строить тестовые мешки вместо обучающих
    #[arg(long)]
    test: bool,
    /// Только ядра одного типа: epithelial, inflammatory, fibroblast, others
    #[arg(long)]
    nucleus_type: Option<String>,
    #[arg(long)]
    augment: bool,
    #[arg(long)]
    loc_info: bool,
    #[arg(long)]
    shuffle_bag: bool,
    #[arg(long)]
    push: bool,
    #[arg(long)]
    seed: Option<u64>,
    /// Директория для экспорта мешков
    #[arg(long)]
    export: Option<PathBuf>,
    /// Экспортировать только первые N мешков
    #[arg(long)]
    export_limit: Option<usize>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    match cli.command {
        Command::Mnist(args) => run_mnist(args),
        Command::Colon(args) => run_colon(args),
    }
}

fn run_mnist(args: MnistArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config: MnistBagsConfig = match &args.config {
        Some(path) => load_config(path)?,
        None => MnistBagsConfig::default(),
    };
    if let Some(fold_id) = args.fold_id {
        config.fold_id = fold_id;
    }
    if let Some(target) = args.target_number {
        config.target_number = target;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if args.test {
        config.train = false;
    }

    let source = format!(
        "mnist target {} fold {} {}",
        config.target_number,
        config.fold_id,
        if config.train { "train" } else { "test" }
    );
    let seed = config.seed;

    let start = Instant::now();
    let digits = MnistDigits::load_all(&args.data_dir)?;
    let bags = MnistBags::new(&digits, config)?;
    info!("Мешки построены за {:.2?}", start.elapsed());

    run_epoch(bags, Some(seed), args.export.as_deref(), args.export_limit, &source)
}

fn run_colon(args: ColonArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config: ColonBagsConfig = match &args.config {
        Some(path) => load_config(path)?,
        None => ColonBagsConfig::default(),
    };
    if let Some(path) = args.path {
        config.path = path;
    }
    if let Some(idxs) = args.train_idxs {
        config.train_val_idxs = idxs;
    }
    if let Some(idxs) = args.test_idxs {
        config.test_idxs = idxs;
    }
    if let Some(nucleus) = args.nucleus_type {
        config.nucleus_type = Some(nucleus.parse::<NucleusType>()?);
    }
    if let Some(seed) = args.seed {
        config.seed = Some(seed);
    }
    config.train &= !args.test;
    config.data_augmentation |= args.augment;
    config.loc_info |= args.loc_info;
    config.shuffle_bag |= args.shuffle_bag;
    config.push |= args.push;

    let source = format!(
        "colon {} {}",
        config.path.display(),
        if config.train { "train" } else { "test" }
    );
    let seed = config.seed;

    let start = Instant::now();
    let bags = ColonCancerBags::new(config)?;
    info!("Мешки построены за {:.2?}", start.elapsed());

    run_epoch(bags, seed, args.export.as_deref(), args.export_limit, &source)
}

/// Выводит статистику, проходит одну перемешанную эпоху по одному мешку
/// и при необходимости экспортирует датасет.
fn run_epoch<D: MilDataset>(
    dataset: D,
    seed: Option<u64>,
    export: Option<&Path>,
    export_limit: Option<usize>,
    source: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let stats = dataset.stats();
    info!(
        "{}: мешков {}, положительных {}, длина min/mean/max {}/{:.1}/{}",
        source, stats.num_bags, stats.positive_bags, stats.min_len, stats.mean_len, stats.max_len
    );

    let mut loader = DataLoader::new(dataset, 1).shuffle(true);
    if let Some(seed) = seed {
        loader = loader.seed(seed);
    }

    let start = Instant::now();
    let mut instances = 0;
    for batch in loader.iter() {
        for ((sample, label), index) in batch.items.iter().zip(&batch.labels).zip(&batch.indices) {
            instances += sample.len();
            debug!(
                "мешок {}: форма {:?}, метка {:?}, raw {:?}",
                index,
                sample.bag.shape(),
                label.as_slice().unwrap_or_default(),
                sample.raw.as_ref().map(|raw| raw.shape().to_vec())
            );
        }
    }
    info!(
        "Эпоха: {} мешков, {} экземпляров за {:.2?}",
        loader.len(),
        instances,
        start.elapsed()
    );

    if let Some(dir) = export {
        let dataset = loader.dataset();
        let manifest = match export_limit {
            Some(limit) if limit < dataset.len() => {
                let subset = SubsetDataset::new(dataset, (0..limit).collect());
                export_bags(&subset, dir, source)?
            }
            _ => export_bags(dataset, dir, source)?,
        };
        info!("Манифест: {} мешков, версия {}", manifest.num_bags, manifest.version);
    }

    Ok(())
}
