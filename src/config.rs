use clap::Parser;
use std::path::PathBuf;

use crate::{
    choropleth::Dataset,
    data::GeoLevel,
    fetch::DataSource,
    project::{AmountScale, DEFAULT_SEGMENTS},
};

/// Mapa przepływów wydatków federalnych w terminalu
#[derive(Parser, Debug)]
#[command(name = "flow-atlas", version, about)]
pub struct Args {
    /// Katalog z danymi albo adres http(s)://
    #[arg(long, default_value = "data")]
    pub data: String,

    /// Poziom geograficzny na starcie
    #[arg(long, value_enum, default_value_t = GeoLevel::State)]
    pub level: GeoLevel,

    /// Zbiór danych kartogramu
    #[arg(long, value_enum, default_value_t = Dataset::Census)]
    pub dataset: Dataset,

    /// Skala grubości linii
    #[arg(long, value_enum, default_value_t = AmountScale::Linear)]
    pub scale: AmountScale,

    /// Liczba odcinków łuku
    #[arg(long, default_value_t = DEFAULT_SEGMENTS)]
    pub curve_points: usize,

    /// Plik logu (terminal jest zajęty przez UI)
    #[arg(long, default_value = "flow_atlas.log")]
    pub log_file: PathBuf,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub source: DataSource,
    pub level: GeoLevel,
    pub dataset: Dataset,
    pub scale: AmountScale,
    pub segments: usize,
    pub log_file: PathBuf,
}

impl Config {
    pub fn from_args(args: Args) -> Result<Self, String> {
        if !(1..=512).contains(&args.curve_points) {
            return Err(format!("--curve-points musi być w zakresie 1..=512, podano {}", args.curve_points));
        }
        Ok(Self {
            source: DataSource::parse(&args.data)?,
            level: args.level,
            dataset: args.dataset,
            scale: args.scale,
            segments: args.curve_points,
            log_file: args.log_file,
        })
    }
}
