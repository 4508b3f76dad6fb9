use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fmt,
    sync::Arc,
};
use tracing::{debug, info};

/// Poziomy geografii: stan → okręg kongresowy → hrabstwo
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum GeoLevel {
    State,
    Congress,
    County,
}

impl GeoLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeoLevel::State    => "state",
            GeoLevel::Congress => "congress",
            GeoLevel::County   => "county",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            GeoLevel::State    => "Stany",
            GeoLevel::Congress => "Okręgi kongresowe",
            GeoLevel::County   => "Hrabstwa",
        }
    }

    /// Kolejny poziom (cyklicznie)
    pub fn next(&self) -> Self {
        match self {
            GeoLevel::State    => GeoLevel::Congress,
            GeoLevel::Congress => GeoLevel::County,
            GeoLevel::County   => GeoLevel::State,
        }
    }

    /// Tylko przepływy stanowe nie mają wymiaru roku
    pub fn has_years(&self) -> bool {
        !matches!(self, GeoLevel::State)
    }
}

impl fmt::Display for GeoLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Znormalizowany przepływ, niezależny od poziomu – to konsumuje rysowanie
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VisualFlow {
    pub id: String,
    pub origin_name: String,
    pub dest_name: String,
    pub origin_state: String,
    pub dest_state: String,
    pub origin_lat: f64,
    pub origin_lon: f64,
    pub dest_lat: f64,
    pub dest_lon: f64,
    pub amount: f64,
    pub agency: String,
}

/// Wspólny widok na rekord przepływu; każdy poziom ma własne nazwy pól,
/// więc mapowanie jest rozstrzygane raz, przez typ rekordu.
pub trait LevelRecord {
    /// Identyfikator regionu nadawcy (nazwa stanu / kod okręgu / FIPS hrabstwa)
    fn origin_key(&self) -> &str;
    fn dest_key(&self) -> &str;
    /// Stan, do którego należy region – po nim działa filtr `state`
    fn origin_state(&self) -> &str;
    fn dest_state(&self) -> &str;
    /// Pełna nazwa do wyświetlenia, a gdy jej brak – surowy kod
    fn origin_label(&self) -> &str;
    fn dest_label(&self) -> &str;
    fn raw_amount(&self) -> f64;
    fn agency(&self) -> &str;
    fn origin_point(&self) -> (f64, f64);
    fn dest_point(&self) -> (f64, f64);
    fn flow_id(&self) -> String;

    fn year(&self) -> Option<i32> {
        None
    }

    fn industry(&self) -> Option<&str> {
        None
    }

    fn amount(&self) -> f64 {
        let a = self.raw_amount();
        if a.is_finite() { a } else { 0.0 }
    }

    fn is_self_flow(&self) -> bool {
        self.origin_key() == self.dest_key()
    }

    fn to_visual(&self) -> VisualFlow {
        let (origin_lon, origin_lat) = self.origin_point();
        let (dest_lon, dest_lat) = self.dest_point();
        VisualFlow {
            id: self.flow_id(),
            origin_name: self.origin_label().to_string(),
            dest_name: self.dest_label().to_string(),
            origin_state: self.origin_state().to_string(),
            dest_state: self.dest_state().to_string(),
            origin_lat,
            origin_lon,
            dest_lat,
            dest_lon,
            amount: self.amount(),
            agency: self.agency().to_string(),
        }
    }
}

fn label_or_code<'a>(name: &'a Option<String>, code: &'a str) -> &'a str {
    match name.as_deref() {
        Some(n) if !n.trim().is_empty() => n,
        _ => code,
    }
}

/// Przepływy między stanami (state_flows.json) – zsumowane po wszystkich latach
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct StateFlow {
    pub origin_state: String,
    pub dest_state: String,
    pub origin_lat: f64,
    pub origin_lon: f64,
    pub dest_lat: f64,
    pub dest_lon: f64,
    #[serde(rename = "total_amount")]
    pub amount: f64,
    pub agency: String,
    pub naics: Option<String>,
}

impl LevelRecord for StateFlow {
    fn origin_key(&self) -> &str { &self.origin_state }
    fn dest_key(&self) -> &str { &self.dest_state }
    fn origin_state(&self) -> &str { &self.origin_state }
    fn dest_state(&self) -> &str { &self.dest_state }
    fn origin_label(&self) -> &str { &self.origin_state }
    fn dest_label(&self) -> &str { &self.dest_state }
    fn raw_amount(&self) -> f64 { self.amount }
    fn agency(&self) -> &str { &self.agency }
    fn origin_point(&self) -> (f64, f64) { (self.origin_lon, self.origin_lat) }
    fn dest_point(&self) -> (f64, f64) { (self.dest_lon, self.dest_lat) }

    fn industry(&self) -> Option<&str> {
        self.naics.as_deref()
    }

    fn flow_id(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.origin_state,
            self.dest_state,
            self.agency,
            self.naics.as_deref().unwrap_or("All")
        )
    }
}

/// Przepływy między okręgami kongresowymi (congress_flows.json)
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct CongressFlow {
    pub origin_district: String,
    pub dest_district: String,
    pub origin_district_name: Option<String>,
    pub dest_district_name: Option<String>,
    pub origin_state: String,
    pub dest_state: String,
    pub origin_lat: f64,
    pub origin_lon: f64,
    pub dest_lat: f64,
    pub dest_lon: f64,
    pub amount: f64,
    pub agency: String,
    pub year: Option<i32>,
}

impl LevelRecord for CongressFlow {
    fn origin_key(&self) -> &str { &self.origin_district }
    fn dest_key(&self) -> &str { &self.dest_district }
    fn origin_state(&self) -> &str { &self.origin_state }
    fn dest_state(&self) -> &str { &self.dest_state }
    fn origin_label(&self) -> &str { label_or_code(&self.origin_district_name, &self.origin_district) }
    fn dest_label(&self) -> &str { label_or_code(&self.dest_district_name, &self.dest_district) }
    fn raw_amount(&self) -> f64 { self.amount }
    fn agency(&self) -> &str { &self.agency }
    fn origin_point(&self) -> (f64, f64) { (self.origin_lon, self.origin_lat) }
    fn dest_point(&self) -> (f64, f64) { (self.dest_lon, self.dest_lat) }

    fn year(&self) -> Option<i32> {
        self.year
    }

    fn flow_id(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.origin_district,
            self.dest_district,
            self.year.map(|y| y.to_string()).unwrap_or_default(),
            self.agency
        )
    }
}

/// Przepływy między hrabstwami (county_flows.json)
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct CountyFlow {
    pub origin_fips: String,
    pub dest_fips: String,
    pub origin_county_name: Option<String>,
    pub dest_county_name: Option<String>,
    pub origin_state: String,
    pub dest_state: String,
    pub origin_lat: f64,
    pub origin_lon: f64,
    pub dest_lat: f64,
    pub dest_lon: f64,
    #[serde(rename = "subaward_amount")]
    pub amount: f64,
    pub agency: String,
    pub year: Option<i32>,
}

impl LevelRecord for CountyFlow {
    fn origin_key(&self) -> &str { &self.origin_fips }
    fn dest_key(&self) -> &str { &self.dest_fips }
    fn origin_state(&self) -> &str { &self.origin_state }
    fn dest_state(&self) -> &str { &self.dest_state }
    fn origin_label(&self) -> &str { label_or_code(&self.origin_county_name, &self.origin_fips) }
    fn dest_label(&self) -> &str { label_or_code(&self.dest_county_name, &self.dest_fips) }
    fn raw_amount(&self) -> f64 { self.amount }
    fn agency(&self) -> &str { &self.agency }
    fn origin_point(&self) -> (f64, f64) { (self.origin_lon, self.origin_lat) }
    fn dest_point(&self) -> (f64, f64) { (self.dest_lon, self.dest_lat) }

    fn year(&self) -> Option<i32> {
        self.year
    }

    fn flow_id(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.origin_fips,
            self.dest_fips,
            self.year.map(|y| y.to_string()).unwrap_or_default(),
            self.agency
        )
    }
}

/// Surowe rekordy jednego poziomu
#[derive(Clone, Debug)]
pub enum FlowTable {
    State(Vec<StateFlow>),
    Congress(Vec<CongressFlow>),
    County(Vec<CountyFlow>),
}

impl FlowTable {
    pub fn from_slice(level: GeoLevel, bytes: &[u8]) -> Result<Self, serde_json::Error> {
        Ok(match level {
            GeoLevel::State    => FlowTable::State(serde_json::from_slice(bytes)?),
            GeoLevel::Congress => FlowTable::Congress(serde_json::from_slice(bytes)?),
            GeoLevel::County   => FlowTable::County(serde_json::from_slice(bytes)?),
        })
    }

    pub fn level(&self) -> GeoLevel {
        match self {
            FlowTable::State(_)    => GeoLevel::State,
            FlowTable::Congress(_) => GeoLevel::Congress,
            FlowTable::County(_)   => GeoLevel::County,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            FlowTable::State(v)    => v.len(),
            FlowTable::Congress(v) => v.len(),
            FlowTable::County(v)   => v.len(),
        }
    }

    /// Uzupełnia brakujące nazwy okręgów z tabeli etykiet.
    /// Wywoływane przed włożeniem tabeli do cache – potem tabela jest tylko do odczytu.
    pub fn resolve_labels(&mut self, labels: &DistrictLabels) {
        if let FlowTable::Congress(rows) = self {
            let mut resolved = 0usize;
            for row in rows.iter_mut() {
                if row.origin_district_name.is_none() {
                    row.origin_district_name = labels.display_name(&row.origin_district);
                    resolved += row.origin_district_name.is_some() as usize;
                }
                if row.dest_district_name.is_none() {
                    row.dest_district_name = labels.display_name(&row.dest_district);
                    resolved += row.dest_district_name.is_some() as usize;
                }
            }
            debug!(resolved, "district labels applied");
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
enum LabelEntry {
    Name(String),
    Detail {
        #[serde(default)]
        label: Option<String>,
        #[serde(default)]
        party: Option<String>,
    },
}

/// Okręg → etykieta / partia (district_labels.json)
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(transparent)]
pub struct DistrictLabels {
    entries: HashMap<String, LabelEntry>,
}

impl DistrictLabels {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn label(&self, district: &str) -> Option<&str> {
        match self.entries.get(&district.trim().to_uppercase())? {
            LabelEntry::Name(n) => Some(n),
            LabelEntry::Detail { label, .. } => label.as_deref(),
        }
    }

    pub fn party(&self, district: &str) -> Option<&str> {
        match self.entries.get(&district.trim().to_uppercase())? {
            LabelEntry::Name(_) => None,
            LabelEntry::Detail { party, .. } => party.as_deref(),
        }
    }

    /// Etykieta z partią w nawiasie, np. `San Francisco (D)`
    pub fn display_name(&self, district: &str) -> Option<String> {
        let label = self.label(district)?;
        Some(match self.party(district) {
            Some(party) => format!("{} ({})", label, party),
            None => label.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Cache surowych danych: jedna tabela na poziom, ładowana raz na sesję.
/// Nigdy nie unieważniana – tworzona przy starcie i przekazywana jawnie.
#[derive(Debug, Default)]
pub struct FlowCache {
    tables: HashMap<GeoLevel, Arc<FlowTable>>,
}

impl FlowCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, level: GeoLevel) -> Option<Arc<FlowTable>> {
        self.tables.get(&level).cloned()
    }

    pub fn contains(&self, level: GeoLevel) -> bool {
        self.tables.contains_key(&level)
    }

    /// Wstawia tabelę, jeśli poziom nie był jeszcze załadowany; zwraca tabelę z cache
    pub fn insert(&mut self, table: FlowTable) -> Arc<FlowTable> {
        let level = table.level();
        let rows = table.len();
        self.tables
            .entry(level)
            .or_insert_with(|| {
                info!(level = %level, rows, "flow table cached");
                Arc::new(table)
            })
            .clone()
    }
}
