use geojson::{FeatureCollection, GeoJson};
use reqwest::{Url, blocking::Client, header::ACCEPT};
use std::{
    collections::HashMap,
    fs::File,
    io::{self, Read},
    path::PathBuf,
    str::FromStr,
    sync::{
        Arc,
        mpsc::{self, Receiver, Sender},
    },
    thread,
    time::Instant,
};
use tracing::{debug, info, warn};

use crate::{
    choropleth::{Dataset, Row},
    data::{DistrictLabels, FlowTable, GeoLevel},
    error::LoadError,
};

const CHUNK_SIZE: usize = 64 * 1024;

/// Skąd bierzemy dane: katalog lokalny albo serwer HTTP
#[derive(Clone, Debug, PartialEq)]
pub enum DataSource {
    Local(PathBuf),
    Remote(Url),
}

impl DataSource {
    pub fn parse(s: &str) -> Result<Self, String> {
        if s.starts_with("http://") || s.starts_with("https://") {
            // bez końcowego '/' Url::join podmieniłby ostatni segment
            let base = if s.ends_with('/') { s.to_string() } else { format!("{}/", s) };
            Url::parse(&base).map(DataSource::Remote).map_err(|e| format!("zły adres {}: {}", s, e))
        } else {
            Ok(DataSource::Local(PathBuf::from(s)))
        }
    }
}

/// Wszystkie zasoby, które atlas potrafi pobrać
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Resource {
    Flows(GeoLevel),
    Boundaries(GeoLevel),
    DistrictLabels,
    Dataset(Dataset, GeoLevel),
}

impl Resource {
    pub fn path(&self) -> String {
        match self {
            Resource::Flows(level) => format!("{}_flows.json", level.as_str()),
            Resource::Boundaries(level) => match level {
                GeoLevel::State    => "states.geojson".to_string(),
                GeoLevel::County   => "counties.geojson".to_string(),
                GeoLevel::Congress => "congress.geojson".to_string(),
            },
            Resource::DistrictLabels => "district_labels.json".to_string(),
            Resource::Dataset(ds, level) => format!("{}/{}_{}.json", ds.dir(), ds.prefix(), level.as_str()),
        }
    }
}

/// Content-Type po rozszerzeniu pliku
pub fn content_type_for(name: &str) -> &'static str {
    if name.ends_with(".geojson") {
        "application/geo+json"
    } else if name.ends_with(".json") {
        "application/json"
    } else {
        "application/octet-stream"
    }
}

/// Odbiorca postępu pobierania, przekazywany osobno do każdego żądania
pub trait ProgressSink {
    fn progress(&mut self, loaded: u64, total: Option<u64>);
}

pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn progress(&mut self, _loaded: u64, _total: Option<u64>) {}
}

impl<F: FnMut(u64, Option<u64>)> ProgressSink for F {
    fn progress(&mut self, loaded: u64, total: Option<u64>) {
        self(loaded, total)
    }
}

/// Czyta całość kawałkami, raportując postęp; parsowanie dopiero po złożeniu
fn read_chunked<R: Read>(mut reader: R, total: Option<u64>, sink: &mut dyn ProgressSink) -> io::Result<Vec<u8>> {
    let mut body = Vec::with_capacity(total.unwrap_or(0).min(64 * 1024 * 1024) as usize);
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        body.extend_from_slice(&buf[..n]);
        sink.progress(body.len() as u64, total);
    }
    Ok(body)
}

pub fn fetch_bytes(source: &DataSource, resource: &Resource, sink: &mut dyn ProgressSink) -> Result<Vec<u8>, LoadError> {
    let name = resource.path();
    let io_err = |source: io::Error| LoadError::Io { resource: name.clone(), source };
    let start = Instant::now();

    let body = match source {
        DataSource::Local(base) => {
            let file = File::open(base.join(&name)).map_err(io_err)?;
            let total = file.metadata().ok().map(|m| m.len());
            read_chunked(file, total, sink).map_err(io_err)?
        }
        DataSource::Remote(base) => {
            let url = base
                .join(&name)
                .map_err(|e| io_err(io::Error::new(io::ErrorKind::InvalidInput, e.to_string())))?;
            let resp = Client::new()
                .get(url)
                .header(ACCEPT, content_type_for(&name))
                .send()
                .map_err(|source| LoadError::Network { resource: name.clone(), source })?;
            if !resp.status().is_success() {
                return Err(LoadError::Status { resource: name.clone(), status: resp.status().as_u16() });
            }
            let total = resp.content_length();
            read_chunked(resp, total, sink).map_err(io_err)?
        }
    };

    debug!(resource = %name, bytes = body.len(), elapsed_ms = start.elapsed().as_millis() as u64, "resource fetched");
    Ok(body)
}

pub fn load_flow_table(
    source: &DataSource,
    level: GeoLevel,
    labels: Option<&DistrictLabels>,
    sink: &mut dyn ProgressSink,
) -> Result<FlowTable, LoadError> {
    let resource = Resource::Flows(level);
    let bytes = fetch_bytes(source, &resource, sink)?;
    let mut table = FlowTable::from_slice(level, &bytes).map_err(|e| LoadError::parse(resource.path(), e))?;
    if let Some(labels) = labels {
        table.resolve_labels(labels);
    }
    Ok(table)
}

pub fn load_district_labels(source: &DataSource) -> Result<DistrictLabels, LoadError> {
    let resource = Resource::DistrictLabels;
    let bytes = fetch_bytes(source, &resource, &mut NoProgress)?;
    let labels = DistrictLabels::from_slice(&bytes).map_err(|e| LoadError::parse(resource.path(), e))?;
    debug!(entries = labels.len(), "district labels loaded");
    Ok(labels)
}

pub fn load_boundaries(source: &DataSource, level: GeoLevel, sink: &mut dyn ProgressSink) -> Result<FeatureCollection, LoadError> {
    let resource = Resource::Boundaries(level);
    let bytes = fetch_bytes(source, &resource, sink)?;
    let txt = String::from_utf8(bytes).map_err(|e| LoadError::parse(resource.path(), e))?;
    match GeoJson::from_str(&txt).map_err(|e| LoadError::parse(resource.path(), e))? {
        GeoJson::FeatureCollection(fc) => Ok(fc),
        GeoJson::Feature(f) => Ok(FeatureCollection { bbox: None, features: vec![f], foreign_members: None }),
        GeoJson::Geometry(_) => Err(LoadError::parse(resource.path(), "oczekiwano FeatureCollection")),
    }
}

pub fn load_dataset_rows(source: &DataSource, dataset: Dataset, level: GeoLevel) -> Result<Vec<Row>, LoadError> {
    let resource = Resource::Dataset(dataset, level);
    let bytes = fetch_bytes(source, &resource, &mut NoProgress)?;
    serde_json::from_slice(&bytes).map_err(|e| LoadError::parse(resource.path(), e))
}

/// Rodzaje żądań – każdy ma własny licznik generacji.
/// Granice stanów i nakładka poziomu to osobne rodzaje: nie wypierają się nawzajem.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JobKind {
    Flows,
    StateBorders,
    Overlay,
    Dataset,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Job {
    Flows(GeoLevel),
    Boundaries(GeoLevel),
    Dataset(Dataset, GeoLevel),
}

impl Job {
    pub fn kind(&self) -> JobKind {
        match self {
            Job::Flows(_)      => JobKind::Flows,
            Job::Boundaries(GeoLevel::State) => JobKind::StateBorders,
            Job::Boundaries(_) => JobKind::Overlay,
            Job::Dataset(..)   => JobKind::Dataset,
        }
    }
}

#[derive(Debug)]
pub enum Payload {
    Flows(FlowTable),
    Boundaries {
        level: GeoLevel,
        features: FeatureCollection,
    },
    Dataset {
        dataset: Dataset,
        level: GeoLevel,
        rows: Vec<Row>,
    },
}

#[derive(Debug)]
enum LoadMsg {
    Progress { job: Job, generation: u64, loaded: u64, total: Option<u64> },
    Done { job: Job, generation: u64, result: Result<Payload, LoadError> },
}

/// Zdarzenia przekazywane do stanu aplikacji – tylko z aktualnych żądań.
/// Każde niesie żądanie, którego dotyczy, żeby stan nie przypisał wyniku innemu poziomowi.
#[derive(Debug)]
pub enum LoadEvent {
    Progress { job: Job, loaded: u64, total: Option<u64> },
    Finished { job: Job, result: Result<Payload, LoadError> },
}

/// Ostatni zapis wygrywa: wynik liczy się tylko, gdy jego generacja jest najnowsza
#[derive(Debug, Default)]
pub struct RequestTracker {
    latest: u64,
    in_flight: bool,
}

impl RequestTracker {
    pub fn begin(&mut self) -> u64 {
        self.latest += 1;
        self.in_flight = true;
        self.latest
    }

    pub fn is_current(&self, generation: u64) -> bool {
        generation == self.latest
    }

    pub fn finish(&mut self, generation: u64) -> bool {
        if self.is_current(generation) {
            self.in_flight = false;
            true
        } else {
            false
        }
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }
}

struct ChannelProgress {
    tx: Sender<LoadMsg>,
    job: Job,
    generation: u64,
}

impl ProgressSink for ChannelProgress {
    fn progress(&mut self, loaded: u64, total: Option<u64>) {
        let _ = self.tx.send(LoadMsg::Progress { job: self.job, generation: self.generation, loaded, total });
    }
}

fn run_job(source: &DataSource, job: Job, sink: &mut dyn ProgressSink) -> Result<Payload, LoadError> {
    match job {
        Job::Flows(level) => {
            let labels = if level == GeoLevel::Congress {
                match load_district_labels(source) {
                    Ok(labels) => Some(labels),
                    Err(e) => {
                        warn!(error = %e, "district labels unavailable, falling back to codes");
                        None
                    }
                }
            } else {
                None
            };
            load_flow_table(source, level, labels.as_ref(), sink).map(Payload::Flows)
        }
        Job::Boundaries(level) => {
            load_boundaries(source, level, sink).map(|features| Payload::Boundaries { level, features })
        }
        Job::Dataset(dataset, level) => {
            load_dataset_rows(source, dataset, level).map(|rows| Payload::Dataset { dataset, level, rows })
        }
    }
}

/// Pobieranie w tle: jeden wątek na żądanie, wyniki przez kanał.
/// Wątek UI odbiera je w `drain` i odrzuca przestarzałe.
pub struct Loader {
    source: Arc<DataSource>,
    tx: Sender<LoadMsg>,
    rx: Receiver<LoadMsg>,
    trackers: HashMap<JobKind, RequestTracker>,
}

impl Loader {
    pub fn new(source: DataSource) -> Self {
        let (tx, rx) = mpsc::channel();
        Self { source: Arc::new(source), tx, rx, trackers: HashMap::new() }
    }

    pub fn submit(&mut self, job: Job) -> u64 {
        let kind = job.kind();
        let generation = self.trackers.entry(kind).or_default().begin();
        let source = Arc::clone(&self.source);
        let tx = self.tx.clone();
        debug!(?job, generation, "load submitted");

        thread::spawn(move || {
            let mut sink = ChannelProgress { tx: tx.clone(), job, generation };
            let result = run_job(&source, job, &mut sink);
            let _ = tx.send(LoadMsg::Done { job, generation, result });
        });
        generation
    }

    pub fn is_loading(&self, kind: JobKind) -> bool {
        self.trackers.get(&kind).is_some_and(RequestTracker::in_flight)
    }

    /// Odbiera wszystko, co już przyszło, bez blokowania
    pub fn drain(&mut self) -> Vec<LoadEvent> {
        let mut events = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            match msg {
                LoadMsg::Progress { job, generation, loaded, total } => {
                    if self.trackers.get(&job.kind()).is_some_and(|t| t.is_current(generation)) {
                        events.push(LoadEvent::Progress { job, loaded, total });
                    }
                }
                LoadMsg::Done { job, generation, result } => {
                    let tracker = self.trackers.entry(job.kind()).or_default();
                    if tracker.finish(generation) {
                        if let Err(e) = &result {
                            warn!(?job, resource = e.resource(), error = %e, "load failed");
                        } else {
                            info!(?job, generation, "load finished");
                        }
                        events.push(LoadEvent::Finished { job, result });
                    } else {
                        debug!(?job, generation, "stale load result dropped");
                    }
                }
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::{fs, time::Duration};

    fn write(dir: &std::path::Path, name: &str, body: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, body).unwrap();
    }

    #[test]
    fn resource_paths_and_content_types() {
        assert_eq!(Resource::Flows(GeoLevel::County).path(), "county_flows.json");
        assert_eq!(Resource::Boundaries(GeoLevel::Congress).path(), "congress.geojson");
        assert_eq!(Resource::Dataset(Dataset::Census, GeoLevel::State).path(), "census/acs_state.json");
        assert_eq!(content_type_for("states.geojson"), "application/geo+json");
        assert_eq!(content_type_for("state_flows.json"), "application/json");
        assert_eq!(content_type_for("readme"), "application/octet-stream");
    }

    #[test]
    fn data_source_parsing() {
        assert_eq!(DataSource::parse("data").unwrap(), DataSource::Local(PathBuf::from("data")));
        let DataSource::Remote(url) = DataSource::parse("https://atlas.example.org/static").unwrap() else {
            panic!("expected remote source");
        };
        assert_eq!(url.join("states.geojson").unwrap().as_str(), "https://atlas.example.org/static/states.geojson");
    }

    #[test]
    fn chunked_read_reports_progress_until_complete() {
        let payload = vec![7u8; CHUNK_SIZE * 2 + 10];
        let mut seen = Vec::new();
        let mut sink = |loaded: u64, total: Option<u64>| seen.push((loaded, total));
        let body = read_chunked(payload.as_slice(), Some(payload.len() as u64), &mut sink).unwrap();

        assert_eq!(body.len(), payload.len());
        assert!(seen.len() >= 3);
        assert_eq!(seen.last(), Some(&(payload.len() as u64, Some(payload.len() as u64))));
        assert!(seen.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn local_failures_are_distinguishable() {
        let dir = tempfile::tempdir().unwrap();
        let source = DataSource::Local(dir.path().to_path_buf());

        let missing = load_flow_table(&source, GeoLevel::State, None, &mut NoProgress).unwrap_err();
        assert!(missing.is_unavailable());

        write(dir.path(), "state_flows.json", "[{\"origin_state\": ");
        let broken = load_flow_table(&source, GeoLevel::State, None, &mut NoProgress).unwrap_err();
        assert!(matches!(broken, LoadError::Parse { .. }));

        write(dir.path(), "states.geojson", "{\"type\": \"Nope\"}");
        assert!(matches!(load_boundaries(&source, GeoLevel::State, &mut NoProgress), Err(LoadError::Parse { .. })));
    }

    #[test]
    fn loads_tables_and_boundaries_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "state_flows.json",
            &json!([{ "origin_state": "CA", "dest_state": "TX", "total_amount": 100.0, "agency": "DOD" }]).to_string(),
        );
        write(
            dir.path(),
            "states.geojson",
            &json!({
                "type": "FeatureCollection",
                "features": [{
                    "type": "Feature",
                    "properties": { "id": "06", "name": "California" },
                    "geometry": { "type": "Polygon", "coordinates": [[[-124.0, 42.0], [-114.0, 42.0], [-114.0, 32.5], [-124.0, 42.0]]] }
                }]
            })
            .to_string(),
        );
        let source = DataSource::Local(dir.path().to_path_buf());

        let table = load_flow_table(&source, GeoLevel::State, None, &mut NoProgress).unwrap();
        assert_eq!(table.len(), 1);
        let fc = load_boundaries(&source, GeoLevel::State, &mut NoProgress).unwrap();
        assert_eq!(fc.features.len(), 1);
    }

    #[test]
    fn tracker_only_accepts_latest_generation() {
        let mut t = RequestTracker::default();
        let first = t.begin();
        let second = t.begin();
        assert!(t.in_flight());
        assert!(!t.finish(first));
        assert!(t.in_flight());
        assert!(t.finish(second));
        assert!(!t.in_flight());
    }

    #[test]
    fn superseded_request_never_reaches_state() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "state_flows.json",
            &json!([{ "origin_state": "CA", "dest_state": "TX", "total_amount": 1.0 }]).to_string(),
        );
        write(
            dir.path(),
            "county_flows.json",
            &json!([{ "origin_fips": "06037", "dest_fips": "48201", "subaward_amount": 2.0, "year": 2020 }]).to_string(),
        );
        let mut loader = Loader::new(DataSource::Local(dir.path().to_path_buf()));
        loader.submit(Job::Flows(GeoLevel::State));
        loader.submit(Job::Flows(GeoLevel::County));

        let mut finished = Vec::new();
        for _ in 0..200 {
            for ev in loader.drain() {
                if let LoadEvent::Finished { result, .. } = ev {
                    finished.push(result);
                }
            }
            if !finished.is_empty() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        thread::sleep(Duration::from_millis(50));
        for ev in loader.drain() {
            if let LoadEvent::Finished { result, .. } = ev {
                finished.push(result);
            }
        }

        assert_eq!(finished.len(), 1);
        match finished.pop() {
            Some(Ok(Payload::Flows(table))) => assert_eq!(table.level(), GeoLevel::County),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(!loader.is_loading(JobKind::Flows));
    }

    #[test]
    fn state_borders_and_overlay_finish_independently() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "states.geojson", &json!({ "type": "FeatureCollection", "features": [] }).to_string());
        let mut loader = Loader::new(DataSource::Local(dir.path().to_path_buf()));
        loader.submit(Job::Boundaries(GeoLevel::State));
        loader.submit(Job::Boundaries(GeoLevel::County));
        assert!(loader.is_loading(JobKind::StateBorders) && loader.is_loading(JobKind::Overlay));

        let mut finished = Vec::new();
        for _ in 0..200 {
            for ev in loader.drain() {
                if let LoadEvent::Finished { job, result } = ev {
                    finished.push((job, result));
                }
            }
            if finished.len() == 2 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }

        assert_eq!(finished.len(), 2);
        for (job, result) in finished {
            match job {
                Job::Boundaries(GeoLevel::State) => {
                    assert!(matches!(result, Ok(Payload::Boundaries { level: GeoLevel::State, .. })))
                }
                // brak counties.geojson nie psuje granic stanów
                Job::Boundaries(GeoLevel::County) => assert!(result.unwrap_err().is_unavailable()),
                other => panic!("unexpected job: {:?}", other),
            }
        }
    }
}
