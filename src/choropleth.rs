use geojson::FeatureCollection;
use serde_json::Value;
use std::collections::BTreeSet;

use crate::data::GeoLevel;

/// Jeden wiersz zbioru danych: kolumna → wartość
pub type Row = serde_json::Map<String, Value>;

/// (nazwa stanu, FIPS, skrót)
pub const STATE_META: [(&str, &str, &str); 51] = [
    ("alabama", "01", "AL"),
    ("alaska", "02", "AK"),
    ("arizona", "04", "AZ"),
    ("arkansas", "05", "AR"),
    ("california", "06", "CA"),
    ("colorado", "08", "CO"),
    ("connecticut", "09", "CT"),
    ("delaware", "10", "DE"),
    ("district of columbia", "11", "DC"),
    ("florida", "12", "FL"),
    ("georgia", "13", "GA"),
    ("hawaii", "15", "HI"),
    ("idaho", "16", "ID"),
    ("illinois", "17", "IL"),
    ("indiana", "18", "IN"),
    ("iowa", "19", "IA"),
    ("kansas", "20", "KS"),
    ("kentucky", "21", "KY"),
    ("louisiana", "22", "LA"),
    ("maine", "23", "ME"),
    ("maryland", "24", "MD"),
    ("massachusetts", "25", "MA"),
    ("michigan", "26", "MI"),
    ("minnesota", "27", "MN"),
    ("mississippi", "28", "MS"),
    ("missouri", "29", "MO"),
    ("montana", "30", "MT"),
    ("nebraska", "31", "NE"),
    ("nevada", "32", "NV"),
    ("new hampshire", "33", "NH"),
    ("new jersey", "34", "NJ"),
    ("new mexico", "35", "NM"),
    ("new york", "36", "NY"),
    ("north carolina", "37", "NC"),
    ("north dakota", "38", "ND"),
    ("ohio", "39", "OH"),
    ("oklahoma", "40", "OK"),
    ("oregon", "41", "OR"),
    ("pennsylvania", "42", "PA"),
    ("rhode island", "44", "RI"),
    ("south carolina", "45", "SC"),
    ("south dakota", "46", "SD"),
    ("tennessee", "47", "TN"),
    ("texas", "48", "TX"),
    ("utah", "49", "UT"),
    ("vermont", "50", "VT"),
    ("virginia", "51", "VA"),
    ("washington", "53", "WA"),
    ("west virginia", "54", "WV"),
    ("wisconsin", "55", "WI"),
    ("wyoming", "56", "WY"),
];

pub fn state_fips(name: &str) -> Option<&'static str> {
    let name = name.trim().to_lowercase();
    STATE_META.iter().find(|(n, _, _)| *n == name).map(|(_, fips, _)| *fips)
}

pub fn state_abbr(name: &str) -> Option<&'static str> {
    let name = name.trim().to_lowercase();
    STATE_META.iter().find(|(n, _, _)| *n == name).map(|(_, _, abbr)| *abbr)
}

/// Zbiory danych do kartogramu
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum Dataset {
    Census,
    ContractStatic,
    GovSpending,
    Finra,
}

impl Dataset {
    pub const ALL: [Dataset; 4] = [Dataset::Census, Dataset::ContractStatic, Dataset::GovSpending, Dataset::Finra];

    pub fn key(&self) -> &'static str {
        match self {
            Dataset::Census         => "census",
            Dataset::ContractStatic => "contract_static",
            Dataset::GovSpending    => "gov_spending",
            Dataset::Finra          => "finra",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Dataset::Census         => "Census (ACS Demographics)",
            Dataset::ContractStatic => "Contract Flow",
            Dataset::GovSpending    => "Government Spending",
            Dataset::Finra          => "FINRA Financial Literacy",
        }
    }

    pub fn dir(&self) -> &'static str {
        match self {
            Dataset::Census         => "census",
            Dataset::ContractStatic => "contract_static",
            Dataset::GovSpending    => "gov_spending",
            Dataset::Finra          => "Finra",
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            Dataset::Census         => "acs",
            Dataset::ContractStatic => "contract",
            Dataset::GovSpending    => "gov",
            Dataset::Finra          => "finra",
        }
    }

    pub fn next(&self) -> Self {
        let idx = Self::ALL.iter().position(|d| d == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }
}

/// Kolumny identyfikujące region – nie są zmiennymi
pub fn id_columns(level: GeoLevel) -> &'static [&'static str] {
    match level {
        GeoLevel::State    => &["state"],
        GeoLevel::County   => &["county", "state", "fips"],
        GeoLevel::Congress => &["cd_118"],
    }
}

pub fn variables(rows: &[Row], level: GeoLevel) -> Vec<String> {
    let exclude = id_columns(level);
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for row in rows {
        for key in row.keys() {
            if !exclude.contains(&key.as_str()) && seen.insert(key.clone()) {
                out.push(key.clone());
            }
        }
    }
    out
}

/// Liczba albo tekst dający się sparsować; reszta to brak wartości
fn numeric(value: Option<&Value>) -> Option<f64> {
    let v = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if v.is_nan() { None } else { Some(v) }
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn county_fips(value: Option<&Value>) -> Option<String> {
    match numeric(value) {
        Some(n) => Some(format!("{:05}", n as i64)),
        None => text(value),
    }
}

/// Progi kwintyli: wartości pod indeksami int(p * (n-1)) dla p = 0.2..0.8
pub fn quantile_thresholds(values: &[Option<f64>]) -> [f64; 4] {
    let mut clean: Vec<f64> = values.iter().flatten().copied().filter(|v| !v.is_nan()).collect();
    if clean.is_empty() {
        return [0.0; 4];
    }
    clean.sort_by(f64::total_cmp);
    let n = clean.len();
    let pct = |p: f64| clean[(p * (n - 1) as f64) as usize];
    [pct(0.2), pct(0.4), pct(0.6), pct(0.8)]
}

/// 0 = brak danych, 1..=5 = kwintyl
pub fn quintile(value: Option<f64>, thresholds: &[f64; 4]) -> u8 {
    let Some(v) = value.filter(|v| !v.is_nan()) else {
        return 0;
    };
    thresholds
        .iter()
        .position(|t| v <= *t)
        .map(|i| i as u8 + 1)
        .unwrap_or(5)
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Summary {
    pub count: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub median: Option<f64>,
}

pub fn summarize(values: &[Option<f64>]) -> Summary {
    let mut clean: Vec<f64> = values.iter().flatten().copied().filter(|v| !v.is_nan()).collect();
    if clean.is_empty() {
        return Summary::default();
    }
    clean.sort_by(f64::total_cmp);
    let n = clean.len();
    let mid = n / 2;
    let median = if n % 2 == 1 { clean[mid] } else { (clean[mid - 1] + clean[mid]) / 2.0 };
    Summary {
        count: n,
        min: clean.first().copied(),
        max: clean.last().copied(),
        mean: Some(clean.iter().sum::<f64>() / n as f64),
        median: Some(median),
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChoroplethRecord {
    pub id: Option<String>,
    pub label: String,
    pub value: Option<f64>,
    pub quintile: u8,
}

pub fn build_records(rows: &[Row], level: GeoLevel, variable: &str) -> (Vec<ChoroplethRecord>, [f64; 4]) {
    let values: Vec<Option<f64>> = rows.iter().map(|r| numeric(r.get(variable))).collect();
    let thresholds = quantile_thresholds(&values);

    let records = rows
        .iter()
        .zip(values)
        .map(|(row, value)| {
            let (id, label) = match level {
                GeoLevel::State => {
                    let name = text(row.get("state")).unwrap_or_default().to_lowercase();
                    let label = if name.is_empty() { "Unknown".to_string() } else { title_case(&name) };
                    (state_fips(&name).map(str::to_string), label)
                }
                GeoLevel::County => {
                    let county = text(row.get("county")).map(|c| title_case(&c)).unwrap_or_else(|| "Unknown".to_string());
                    let label = match text(row.get("state")).and_then(|s| state_abbr(&s)) {
                        Some(abbr) => format!("{}, {}", county, abbr),
                        None => county,
                    };
                    (county_fips(row.get("fips")), label)
                }
                GeoLevel::Congress => {
                    let id = text(row.get("cd_118")).map(|c| c.to_uppercase());
                    let label = id.clone().unwrap_or_else(|| "Unknown".to_string());
                    (id, label)
                }
            };
            ChoroplethRecord { id, label, value, quintile: quintile(value, &thresholds) }
        })
        .collect();

    (records, thresholds)
}

#[derive(Clone, Debug, PartialEq)]
pub struct Ranked {
    pub label: String,
    pub value: f64,
}

/// Najwyższe i najniższe wartości (najniższe od najmniejszej)
pub fn top_bottom(records: &[ChoroplethRecord], n: usize) -> (Vec<Ranked>, Vec<Ranked>) {
    let mut sorted: Vec<Ranked> = records
        .iter()
        .filter_map(|r| r.value.map(|value| Ranked { label: r.label.clone(), value }))
        .collect();
    sorted.sort_by(|a, b| b.value.total_cmp(&a.value));
    let top = sorted.iter().take(n).cloned().collect();
    let bottom = sorted.iter().rev().take(n).cloned().collect();
    (top, bottom)
}

/// Gotowy kartogram jednej zmiennej
#[derive(Clone, Debug)]
pub struct Choropleth {
    pub dataset: Dataset,
    pub variable: String,
    pub records: Vec<ChoroplethRecord>,
    pub thresholds: [f64; 4],
    pub stats: Summary,
    pub top: Vec<Ranked>,
    pub bottom: Vec<Ranked>,
}

impl Choropleth {
    pub fn build(dataset: Dataset, rows: &[Row], level: GeoLevel, variable: &str) -> Self {
        let (records, thresholds) = build_records(rows, level, variable);
        let values: Vec<Option<f64>> = records.iter().map(|r| r.value).collect();
        let stats = summarize(&values);
        let (top, bottom) = top_bottom(&records, 10);
        Self { dataset, variable: variable.to_string(), records, thresholds, stats, top, bottom }
    }

    pub fn quintile_of(&self, id: &str) -> u8 {
        self.records
            .iter()
            .find(|r| r.id.as_deref() == Some(id))
            .map(|r| r.quintile)
            .unwrap_or(0)
    }

    /// Kopia granic z kolorem kwintyla w `fill` – dopasowanie po właściwości `id`
    pub fn paint(&self, boundaries: &FeatureCollection) -> FeatureCollection {
        let mut painted = boundaries.clone();
        for feature in painted.features.iter_mut() {
            let id = feature.property("id").and_then(|v| text(Some(v)));
            let q = id.as_deref().map(|id| self.quintile_of(id)).unwrap_or(0);
            feature.set_property("quintile", q);
            feature.set_property("fill", quintile_color(q));
        }
        painted
    }
}

pub fn quintile_color(q: u8) -> &'static str {
    match q {
        1 => "#fee5d9",
        2 => "#fcae91",
        3 => "#fb6a4a",
        4 => "#de2d26",
        5 => "#a50f15",
        _ => "#4a4a4a",
    }
}
