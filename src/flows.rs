use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

use crate::{
    data::{FlowCache, FlowTable, GeoLevel, LevelRecord, VisualFlow},
    error::LoadError,
};

/// Wartość filtra oznaczająca „bez ograniczeń”
pub const ALL: &str = "All";

/// Ile przepływów trafia na mapę
pub const DISPLAY_LIMIT: usize = 100;

/// Po której stronie przepływu ma leżeć wybrany stan
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Direction {
    #[default]
    All,
    Origin,
    Destination,
}

impl Direction {
    pub fn next(&self) -> Self {
        match self {
            Direction::All         => Direction::Origin,
            Direction::Origin      => Direction::Destination,
            Direction::Destination => Direction::All,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Direction::All         => "oba kierunki",
            Direction::Origin      => "wypływy",
            Direction::Destination => "wpływy",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FilterCriteria {
    pub level: GeoLevel,
    pub agency: String,
    pub state: String,
    pub direction: Direction,
    pub year_start: Option<i32>,
    pub year_end: Option<i32>,
    pub industry: String,
}

impl Default for FilterCriteria {
    fn default() -> Self {
        Self {
            level: GeoLevel::State,
            agency: ALL.to_string(),
            state: ALL.to_string(),
            direction: Direction::All,
            year_start: None,
            year_end: None,
            industry: ALL.to_string(),
        }
    }
}

impl FilterCriteria {
    pub fn for_level(level: GeoLevel) -> Self {
        Self { level, ..Self::default() }
    }

    /// Stan, względem którego klasyfikujemy wpływy/wypływy
    pub fn focus_state(&self) -> Option<&str> {
        if self.state == ALL { None } else { Some(&self.state) }
    }

    fn keeps<R: LevelRecord>(&self, level: GeoLevel, r: &R) -> bool {
        if self.agency != ALL && r.agency() != self.agency {
            return false;
        }
        if self.state != ALL {
            let matched = match self.direction {
                Direction::All         => r.origin_state() == self.state || r.dest_state() == self.state,
                Direction::Origin      => r.origin_state() == self.state,
                Direction::Destination => r.dest_state() == self.state,
            };
            if !matched {
                return false;
            }
        }
        if level == GeoLevel::State && self.industry != ALL && r.industry() != Some(self.industry.as_str()) {
            return false;
        }
        if level.has_years() && (self.year_start.is_some() || self.year_end.is_some()) {
            // rekord bez roku nie mieści się w żadnym ograniczonym zakresie
            let Some(year) = r.year() else {
                return false;
            };
            if self.year_start.is_some_and(|s| year < s) || self.year_end.is_some_and(|e| year > e) {
                return false;
            }
        }
        !r.is_self_flow()
    }
}

/// Statystyki całego przefiltrowanego zbioru – liczone przed obcięciem do 100
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FullSetSummary {
    pub total_amount: f64,
    pub total_flows: usize,
    pub unique_locations: usize,
}

/// Co najwyżej 100 największych przepływów, malejąco po kwocie
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DisplaySubset {
    pub flows: Vec<VisualFlow>,
}

impl DisplaySubset {
    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    pub fn total_amount(&self) -> f64 {
        self.flows.iter().map(|f| f.amount).sum()
    }

    pub fn find(&self, id: &str) -> Option<&VisualFlow> {
        self.flows.iter().find(|f| f.id == id)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FlowResult {
    pub display: DisplaySubset,
    pub summary: FullSetSummary,
}

impl FlowResult {
    /// Poprawnie załadowane dane, ale zero dopasowań
    pub fn is_empty(&self) -> bool {
        self.summary.total_flows == 0
    }
}

fn aggregate_records<R: LevelRecord>(rows: &[R], level: GeoLevel, criteria: &FilterCriteria) -> FlowResult {
    let mut filtered: Vec<&R> = rows.iter().filter(|r| criteria.keeps(level, *r)).collect();

    let mut locations: HashSet<&str> = HashSet::new();
    let mut total_amount = 0.0;
    for r in filtered.iter().copied() {
        total_amount += r.amount();
        locations.insert(r.origin_label());
        locations.insert(r.dest_label());
    }
    let summary = FullSetSummary { total_amount, total_flows: filtered.len(), unique_locations: locations.len() };

    // sort_by jest stabilny – remisy zachowują kolejność wejściową
    filtered.sort_by(|a, b| b.amount().total_cmp(&a.amount()));

    let mut seen: HashMap<String, usize> = HashMap::new();
    let flows = filtered
        .into_iter()
        .take(DISPLAY_LIMIT)
        .map(|r| {
            let mut flow = r.to_visual();
            let n = seen.entry(flow.id.clone()).or_insert(0);
            *n += 1;
            if *n > 1 {
                flow.id = format!("{}#{}", flow.id, n);
            }
            flow
        })
        .collect();

    FlowResult { display: DisplaySubset { flows }, summary }
}

pub fn aggregate(table: &FlowTable, criteria: &FilterCriteria) -> FlowResult {
    let level = table.level();
    let result = match table {
        FlowTable::State(rows)    => aggregate_records(rows, level, criteria),
        FlowTable::Congress(rows) => aggregate_records(rows, level, criteria),
        FlowTable::County(rows)   => aggregate_records(rows, level, criteria),
    };
    debug!(
        level = %level,
        total_flows = result.summary.total_flows,
        displayed = result.display.len(),
        "flows aggregated"
    );
    result
}

/// Stan tabeli danego poziomu z punktu widzenia agregatora
#[derive(Debug)]
pub enum TableStatus<'a> {
    Loading,
    Failed(&'a LoadError),
}

/// Agregacja na danych z cache; brak tabeli to osobny błąd, nie pusty wynik
pub fn aggregate_cached<'a>(
    cache: &FlowCache,
    criteria: &FilterCriteria,
    failure: Option<&'a LoadError>,
) -> Result<FlowResult, TableStatus<'a>> {
    match cache.get(criteria.level) {
        Some(table) => Ok(aggregate(&table, criteria)),
        None => Err(failure.map(TableStatus::Failed).unwrap_or(TableStatus::Loading)),
    }
}

/// Statystyki pokazywanego podzbioru. Liczone wyłącznie z `DisplaySubset`,
/// nigdy z pełnego zbioru – pełny zbiór ma tylko `FullSetSummary`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DisplayStats {
    pub top_agencies: Vec<(String, f64)>,
    pub top_origins: Vec<(String, f64)>,
    pub top_destinations: Vec<(String, f64)>,
    pub largest: Option<VisualFlow>,
    pub display_total: f64,
}

fn rank_by_sum<'a>(keys: impl Iterator<Item = (&'a str, f64)>, n: usize) -> Vec<(String, f64)> {
    let mut order: Vec<(String, f64)> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for (key, amount) in keys {
        match index.get(key) {
            Some(&i) => order[i].1 += amount,
            None => {
                index.insert(key, order.len());
                order.push((key.to_string(), amount));
            }
        }
    }
    order.sort_by(|a, b| b.1.total_cmp(&a.1));
    order.truncate(n);
    order
}

pub fn display_stats(display: &DisplaySubset, n: usize) -> DisplayStats {
    let flows = &display.flows;
    DisplayStats {
        top_agencies: rank_by_sum(flows.iter().map(|f| (f.agency.as_str(), f.amount)), n),
        top_origins: rank_by_sum(flows.iter().map(|f| (f.origin_name.as_str(), f.amount)), n),
        top_destinations: rank_by_sum(flows.iter().map(|f| (f.dest_name.as_str(), f.amount)), n),
        // lista jest już posortowana malejąco
        largest: flows.first().cloned(),
        display_total: display.total_amount(),
    }
}

/// Wartości dostępne w filtrach dla jednej tabeli
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FilterOptions {
    pub agencies: Vec<String>,
    pub states: Vec<String>,
    pub industries: Vec<String>,
    pub years: Option<(i32, i32)>,
}

fn collect_options<R: LevelRecord>(rows: &[R]) -> FilterOptions {
    let mut agencies = BTreeSet::new();
    let mut states = BTreeSet::new();
    let mut industries = BTreeSet::new();
    let mut years: Option<(i32, i32)> = None;
    for r in rows {
        if !r.agency().is_empty() {
            agencies.insert(r.agency().to_string());
        }
        for s in [r.origin_state(), r.dest_state()] {
            if !s.is_empty() {
                states.insert(s.to_string());
            }
        }
        if let Some(code) = r.industry() {
            industries.insert(code.to_string());
        }
        if let Some(y) = r.year() {
            years = Some(match years {
                Some((lo, hi)) => (lo.min(y), hi.max(y)),
                None => (y, y),
            });
        }
    }
    let with_all = |set: BTreeSet<String>| -> Vec<String> { std::iter::once(ALL.to_string()).chain(set).collect() };
    FilterOptions { agencies: with_all(agencies), states: with_all(states), industries: with_all(industries), years }
}

pub fn filter_options(table: &FlowTable) -> FilterOptions {
    match table {
        FlowTable::State(rows)    => collect_options(rows),
        FlowTable::Congress(rows) => collect_options(rows),
        FlowTable::County(rows)   => collect_options(rows),
    }
}

/// Następna wartość z listy (cyklicznie), np. przy przełączaniu agencji
pub fn cycle(options: &[String], current: &str) -> String {
    if options.is_empty() {
        return ALL.to_string();
    }
    let idx = options.iter().position(|o| o == current).map(|i| (i + 1) % options.len()).unwrap_or(0);
    options[idx].clone()
}
