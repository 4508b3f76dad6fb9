use geo::{Coord, Geometry, Intersects, LineString, MultiLineString, Rect};
use geojson::{Feature, FeatureCollection};
use std::{collections::HashMap, sync::mpsc::Sender};
use tracing::{debug, info};

use crate::data::{GeoLevel, VisualFlow};

pub const STATE_SOURCE: &str = "states";
pub const OVERLAY_SOURCE: &str = "overlay";
pub const CHOROPLETH_SOURCE: &str = "choropleth";
pub const FLOW_SOURCE: &str = "flows";
pub const ENDPOINT_SOURCE: &str = "endpoints";

pub const STATE_BORDER_LAYER: &str = "state-borders";
pub const COUNTY_BORDER_LAYER: &str = "county-borders";
pub const DISTRICT_BORDER_LAYER: &str = "district-borders";
pub const CHOROPLETH_LAYER: &str = "choropleth-fill";
pub const FLOW_LINE_LAYER: &str = "flow-lines";
pub const ENDPOINT_LAYER: &str = "flow-endpoints";

/// Promień zapytania wokół kursora (w komórkach terminala) – linie są cienkie
pub const HIT_RADIUS: f64 = 1.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayerKind {
    Fill,
    Line,
    Circle,
    Border,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Layer {
    pub id: String,
    pub source: String,
    pub kind: LayerKind,
}

impl Layer {
    pub fn new(id: &str, source: &str, kind: LayerKind) -> Self {
        Self { id: id.to_string(), source: source.to_string(), kind }
    }
}

/// Rozcina linię w miejscu skoku długości > 180° (przejście przez antypołudnik)
fn split_antimeridian(line: LineString<f64>) -> Geometry<f64> {
    let mut parts: Vec<LineString<f64>> = Vec::new();
    let mut current: Vec<Coord<f64>> = Vec::new();
    for c in line.0 {
        if let Some(prev) = current.last() {
            if (c.x - prev.x).abs() > 180.0 {
                parts.push(LineString(std::mem::take(&mut current)));
            }
        }
        current.push(c);
    }
    parts.push(LineString(current));
    let parts: Vec<LineString<f64>> = parts.into_iter().filter(|p| !p.0.is_empty()).collect();
    if parts.len() == 1 {
        Geometry::LineString(parts.into_iter().next().unwrap_or(LineString(vec![])))
    } else {
        Geometry::MultiLineString(MultiLineString(parts))
    }
}

fn to_geo(feature: &Feature) -> Option<Geometry<f64>> {
    let value = feature.geometry.as_ref()?.value.clone();
    match Geometry::<f64>::try_from(value).ok()? {
        Geometry::LineString(ls) => Some(split_antimeridian(ls)),
        other => Some(other),
    }
}

/// Źródło danych z geometrią przeliczoną raz, przy zapisie
#[derive(Debug, Clone)]
pub struct Source {
    pub data: FeatureCollection,
    pub geoms: Vec<Option<Geometry<f64>>>,
}

impl Source {
    fn new(data: FeatureCollection) -> Self {
        let geoms = data.features.iter().map(to_geo).collect();
        Self { data, geoms }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Feature, &Geometry<f64>)> {
        self.data
            .features
            .iter()
            .zip(self.geoms.iter())
            .filter_map(|(f, g)| g.as_ref().map(|g| (f, g)))
    }
}

pub fn empty_collection() -> FeatureCollection {
    FeatureCollection { bbox: None, features: vec![], foreign_members: None }
}

/// Silnik mapy: nazwane źródła i stos warstw (indeks 0 = spód)
#[derive(Debug, Default)]
pub struct MapEngine {
    sources: HashMap<String, Source>,
    layers: Vec<Layer>,
    sources_created: usize,
    source_updates: usize,
}

impl MapEngine {
    pub fn source(&self, id: &str) -> Option<&Source> {
        self.sources.get(id)
    }

    /// setData na istniejącym źródle albo utworzenie nowego
    pub fn set_source(&mut self, id: &str, data: FeatureCollection) {
        match self.sources.get_mut(id) {
            Some(existing) => {
                *existing = Source::new(data);
                self.source_updates += 1;
            }
            None => {
                self.sources.insert(id.to_string(), Source::new(data));
                self.sources_created += 1;
                debug!(source = id, "source created");
            }
        }
    }

    pub fn sources_created(&self) -> usize {
        self.sources_created
    }

    pub fn source_updates(&self) -> usize {
        self.source_updates
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn layer_index(&self, id: &str) -> Option<usize> {
        self.layers.iter().position(|l| l.id == id)
    }

    pub fn has_layer(&self, id: &str) -> bool {
        self.layer_index(id).is_some()
    }

    /// Dodaje warstwę pod `before` (jeśli istnieje) albo na wierzch
    pub fn add_layer(&mut self, layer: Layer, before: Option<&str>) {
        if self.has_layer(&layer.id) {
            return;
        }
        match before.and_then(|b| self.layer_index(b)) {
            Some(idx) => self.layers.insert(idx, layer),
            None => self.layers.push(layer),
        }
    }

    pub fn remove_layer(&mut self, id: &str) -> bool {
        let before = self.layers.len();
        self.layers.retain(|l| l.id != id);
        before != self.layers.len()
    }

    /// Obiekty z podanych warstw przecinające prostokąt; najwyżej narysowane najpierw
    pub fn query_rendered_features(&self, bbox: Rect<f64>, layer_ids: &[&str]) -> Vec<(&Layer, &Feature)> {
        let mut hits = Vec::new();
        for layer in self.layers.iter().rev().filter(|l| layer_ids.contains(&l.id.as_str())) {
            let Some(source) = self.sources.get(&layer.source) else {
                continue;
            };
            let found: Vec<&Feature> = source
                .iter()
                .filter(|(_, g)| g.intersects(&bbox))
                .map(|(f, _)| f)
                .collect();
            hits.extend(found.into_iter().rev().map(|f| (layer, f)));
        }
        hits
    }
}

/// Odwzorowanie komórek obszaru mapy na lon/lat (jak osie Canvas: y rośnie w górę)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub x_bounds: [f64; 2],
    pub y_bounds: [f64; 2],
    pub width: u16,
    pub height: u16,
}

impl Default for Viewport {
    fn default() -> Self {
        Self { x_bounds: [-180.0, -60.0], y_bounds: [15.0, 72.0], width: 120, height: 40 }
    }
}

impl Viewport {
    /// Zakres dopasowany do granic; punkty na wschód od 0° (Aleuty za antypołudnikiem) pomijamy
    pub fn fit(&self, fc: &FeatureCollection) -> Self {
        let (mut minx, mut miny, mut maxx, mut maxy) =
            (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY);
        for feature in &fc.features {
            let Some(geom) = to_geo(feature) else { continue };
            for c in geo::CoordsIter::coords_iter(&geom).filter(|c| c.x <= 0.0) {
                minx = minx.min(c.x);
                miny = miny.min(c.y);
                maxx = maxx.max(c.x);
                maxy = maxy.max(c.y);
            }
        }
        if !(minx.is_finite() && maxx > minx && maxy > miny) {
            return *self;
        }
        Self { x_bounds: [minx, maxx], y_bounds: [miny, maxy], ..*self }
    }

    pub fn resize(&mut self, width: u16, height: u16) {
        self.width = width.max(1);
        self.height = height.max(1);
    }

    fn cell_size(&self) -> (f64, f64) {
        (
            (self.x_bounds[1] - self.x_bounds[0]) / self.width.max(1) as f64,
            (self.y_bounds[1] - self.y_bounds[0]) / self.height.max(1) as f64,
        )
    }

    /// Środek komórki (x, y) → (lon, lat)
    pub fn to_lonlat(&self, x: u16, y: u16) -> (f64, f64) {
        let (cw, ch) = self.cell_size();
        (self.x_bounds[0] + (x as f64 + 0.5) * cw, self.y_bounds[1] - (y as f64 + 0.5) * ch)
    }

    /// Prostokąt w lon/lat wokół komórki, rozszerzony o `radius` komórek
    pub fn cell_bbox(&self, x: u16, y: u16, radius: f64) -> Rect<f64> {
        let (cw, ch) = self.cell_size();
        let (lon, lat) = self.to_lonlat(x, y);
        let (rx, ry) = ((0.5 + radius) * cw, (0.5 + radius) * ch);
        Rect::new(Coord { x: lon - rx, y: lat - ry }, Coord { x: lon + rx, y: lat + ry })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct HoverInfo {
    pub x: u16,
    pub y: u16,
    pub flow_id: String,
    pub origin: String,
    pub dest: String,
    pub amount: f64,
    pub agency: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SurfaceEvent {
    Hover(HoverInfo),
    HoverClear,
    Select(VisualFlow),
    Deselect,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CursorStyle {
    #[default]
    Default,
    Pointer,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceState {
    Uninitialized,
    Ready,
}

/// Interaktywna powierzchnia mapy: jeden silnik na cały czas życia widoku.
/// Zmiany danych podmieniają tylko źródła; słuchacz zdarzeń wiązany raz.
#[derive(Debug, Default)]
pub struct MapSurface {
    engine: Option<MapEngine>,
    viewport: Viewport,
    displayed: Vec<VisualFlow>,
    listener: Option<Sender<SurfaceEvent>>,
    cursor: CursorStyle,
}

impl MapSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SurfaceState {
        if self.engine.is_some() { SurfaceState::Ready } else { SurfaceState::Uninitialized }
    }

    /// Tworzy silnik przy pierwszym montowaniu; kolejne wywołania tylko zmieniają rozmiar
    pub fn mount(&mut self, width: u16, height: u16) {
        self.viewport.resize(width, height);
        if self.engine.is_none() {
            self.engine = Some(MapEngine::default());
            info!(width, height, "map surface ready");
        }
    }

    pub fn engine(&self) -> Option<&MapEngine> {
        self.engine.as_ref()
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn cursor(&self) -> CursorStyle {
        self.cursor
    }

    pub fn displayed(&self) -> &[VisualFlow] {
        &self.displayed
    }

    /// Wiąże odbiorcę zdarzeń; zwraca false, jeśli był już związany
    pub fn bind_listeners(&mut self, tx: Sender<SurfaceEvent>) -> bool {
        if self.listener.is_some() {
            return false;
        }
        self.listener = Some(tx);
        true
    }

    fn emit(&self, event: SurfaceEvent) {
        if let Some(tx) = &self.listener {
            let _ = tx.send(event);
        }
    }

    /// Granice stanów zawsze; hrabstwa/okręgi zależnie od poziomu, pod granicami stanów.
    /// Po błędzie pobierania wołający podaje pustą kolekcję.
    pub fn set_boundaries(&mut self, level: GeoLevel, states: FeatureCollection, overlay: Option<FeatureCollection>) {
        let fitted = self.viewport.fit(&states);
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        self.viewport = fitted;
        engine.set_source(STATE_SOURCE, states);
        engine.add_layer(Layer::new(STATE_BORDER_LAYER, STATE_SOURCE, LayerKind::Border), None);

        let wanted = match level {
            GeoLevel::State    => None,
            GeoLevel::County   => Some(COUNTY_BORDER_LAYER),
            GeoLevel::Congress => Some(DISTRICT_BORDER_LAYER),
        };
        for id in [COUNTY_BORDER_LAYER, DISTRICT_BORDER_LAYER] {
            if Some(id) != wanted && engine.remove_layer(id) {
                debug!(layer = id, "overlay layer removed");
            }
        }
        if let Some(id) = wanted {
            engine.set_source(OVERLAY_SOURCE, overlay.unwrap_or_else(empty_collection));
            engine.add_layer(Layer::new(id, OVERLAY_SOURCE, LayerKind::Border), Some(STATE_BORDER_LAYER));
        }
    }

    /// Warstwa kartogramu zawsze pod wszystkimi granicami
    pub fn set_choropleth(&mut self, painted: Option<FeatureCollection>) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        match painted {
            Some(fc) => {
                engine.set_source(CHOROPLETH_SOURCE, fc);
                let lowest_border = [COUNTY_BORDER_LAYER, DISTRICT_BORDER_LAYER, STATE_BORDER_LAYER]
                    .into_iter()
                    .filter_map(|id| engine.layer_index(id).map(|i| (i, id)))
                    .min()
                    .map(|(_, id)| id);
                engine.add_layer(Layer::new(CHOROPLETH_LAYER, CHOROPLETH_SOURCE, LayerKind::Fill), lowest_border);
            }
            None => {
                engine.remove_layer(CHOROPLETH_LAYER);
            }
        }
    }

    pub fn set_flows(&mut self, lines: FeatureCollection, points: FeatureCollection, displayed: Vec<VisualFlow>) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        engine.set_source(FLOW_SOURCE, lines);
        engine.set_source(ENDPOINT_SOURCE, points);
        engine.add_layer(Layer::new(FLOW_LINE_LAYER, FLOW_SOURCE, LayerKind::Line), None);
        engine.add_layer(Layer::new(ENDPOINT_LAYER, ENDPOINT_SOURCE, LayerKind::Circle), None);
        debug!(
            flows = displayed.len(),
            created = engine.sources_created(),
            updates = engine.source_updates(),
            "flow sources set"
        );
        self.displayed = displayed;
    }

    fn hit(&self, x: u16, y: u16) -> Option<&Feature> {
        let engine = self.engine.as_ref()?;
        let bbox = self.viewport.cell_bbox(x, y, HIT_RADIUS);
        engine
            .query_rendered_features(bbox, &[FLOW_LINE_LAYER])
            .into_iter()
            .next()
            .map(|(_, f)| f)
    }

    fn parent_of(&self, feature: &Feature) -> Option<&VisualFlow> {
        let id = feature.property("flow_id")?.as_str()?;
        self.displayed.iter().find(|f| f.id == id)
    }

    pub fn pointer_move(&mut self, x: u16, y: u16) {
        let info = self.hit(x, y).map(|feature| {
            let prop = |k: &str| feature.property(k).and_then(|v| v.as_str()).unwrap_or_default().to_string();
            match self.parent_of(feature) {
                Some(parent) => HoverInfo {
                    x,
                    y,
                    flow_id: parent.id.clone(),
                    origin: parent.origin_name.clone(),
                    dest: parent.dest_name.clone(),
                    amount: parent.amount,
                    agency: parent.agency.clone(),
                },
                None => HoverInfo {
                    x,
                    y,
                    flow_id: prop("flow_id"),
                    origin: prop("origin"),
                    dest: prop("dest"),
                    amount: feature.property("amount").and_then(|v| v.as_f64()).unwrap_or(0.0),
                    agency: prop("agency"),
                },
            }
        });
        match info {
            Some(info) => {
                self.cursor = CursorStyle::Pointer;
                self.emit(SurfaceEvent::Hover(info));
            }
            None => {
                self.cursor = CursorStyle::Default;
                self.emit(SurfaceEvent::HoverClear);
            }
        }
    }

    pub fn pointer_leave(&mut self) {
        self.cursor = CursorStyle::Default;
        self.emit(SurfaceEvent::HoverClear);
    }

    pub fn click(&mut self, x: u16, y: u16) {
        let selected = self.hit(x, y).and_then(|f| self.parent_of(f)).cloned();
        match selected {
            Some(flow) => {
                debug!(flow_id = %flow.id, "flow selected");
                self.emit(SurfaceEvent::Select(flow));
            }
            None => self.emit(SurfaceEvent::Deselect),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        flows::Direction,
        project::{AmountRange, ProjectOptions, endpoints, project},
    };
    use serde_json::json;
    use std::sync::mpsc;

    fn flow(id: &str, o: (f64, f64), d: (f64, f64), amount: f64) -> VisualFlow {
        VisualFlow {
            id: id.into(),
            origin_name: "CA".into(),
            dest_name: "TX".into(),
            origin_state: "CA".into(),
            dest_state: "TX".into(),
            origin_lon: o.0,
            origin_lat: o.1,
            dest_lon: d.0,
            dest_lat: d.1,
            amount,
            agency: "AgencyX".into(),
        }
    }

    fn cell_of(vp: &Viewport, lon: f64, lat: f64) -> Option<(u16, u16)> {
        let (cw, ch) = vp.cell_size();
        let x = ((lon - vp.x_bounds[0]) / cw).floor();
        let y = ((vp.y_bounds[1] - lat) / ch).floor();
        if x < 0.0 || y < 0.0 || x >= vp.width as f64 || y >= vp.height as f64 {
            return None;
        }
        Some((x as u16, y as u16))
    }

    fn ready_surface() -> (MapSurface, mpsc::Receiver<SurfaceEvent>) {
        let mut surface = MapSurface::new();
        surface.mount(120, 57);
        let (tx, rx) = mpsc::channel();
        assert!(surface.bind_listeners(tx));
        (surface, rx)
    }

    fn load_flows(surface: &mut MapSurface, flows: Vec<VisualFlow>) {
        let lines = project(&flows, AmountRange::of(&flows), None, Direction::All, ProjectOptions::default());
        let points = endpoints(&flows);
        surface.set_flows(lines, points, flows);
    }

    fn states() -> FeatureCollection {
        serde_json::from_value(json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "properties": { "id": "06" },
                "geometry": { "type": "Polygon", "coordinates": [[[-124.0, 42.0], [-114.0, 42.0], [-114.0, 32.5], [-124.0, 42.0]]] }
            }]
        }))
        .unwrap()
    }

    #[test]
    fn engine_created_once_and_sources_updated_in_place() {
        let (mut surface, _rx) = ready_surface();
        assert_eq!(surface.state(), SurfaceState::Ready);
        surface.mount(80, 20);
        assert_eq!(surface.viewport().width, 80);

        for _ in 0..3 {
            load_flows(&mut surface, vec![flow("a", (-120.0, 36.0), (-100.0, 31.0), 1.0)]);
        }
        let engine = surface.engine().unwrap();
        assert_eq!(engine.sources_created(), 2);
        assert_eq!(engine.source_updates(), 4);
        assert_eq!(engine.layers().iter().filter(|l| l.id == FLOW_LINE_LAYER).count(), 1);
    }

    #[test]
    fn unmounted_surface_ignores_data() {
        let mut surface = MapSurface::new();
        assert_eq!(surface.state(), SurfaceState::Uninitialized);
        surface.set_flows(empty_collection(), empty_collection(), vec![]);
        assert!(surface.engine().is_none());
    }

    #[test]
    fn listeners_bound_only_once() {
        let (mut surface, rx) = ready_surface();
        let (tx2, rx2) = mpsc::channel();
        assert!(!surface.bind_listeners(tx2));

        surface.click(0, 0);
        assert_eq!(rx.try_iter().count(), 1);
        assert_eq!(rx2.try_iter().count(), 0);
    }

    #[test]
    fn hover_on_segment_reports_parent_flow() {
        let (mut surface, rx) = ready_surface();
        load_flows(&mut surface, vec![flow("CA-TX-2023-AgencyX", (-150.0, 40.0), (-90.0, 40.0), 42.0)]);

        // koniec łuku leży dokładnie na punkcie docelowym
        let (x, y) = cell_of(surface.viewport(), -90.0, 40.0).unwrap();
        surface.pointer_move(x, y);

        match rx.try_recv().unwrap() {
            SurfaceEvent::Hover(info) => {
                assert_eq!(info.flow_id, "CA-TX-2023-AgencyX");
                assert_eq!((info.origin.as_str(), info.dest.as_str()), ("CA", "TX"));
                assert_eq!(info.amount, 42.0);
                assert_eq!((info.x, info.y), (x, y));
            }
            other => panic!("expected hover, got {:?}", other),
        }
        assert_eq!(surface.cursor(), CursorStyle::Pointer);

        // daleko od łuku
        surface.pointer_move(0, 56);
        assert_eq!(rx.try_recv().unwrap(), SurfaceEvent::HoverClear);
        assert_eq!(surface.cursor(), CursorStyle::Default);

        surface.pointer_leave();
        assert_eq!(rx.try_recv().unwrap(), SurfaceEvent::HoverClear);
    }

    #[test]
    fn click_selects_parent_or_deselects() {
        let (mut surface, rx) = ready_surface();
        let parent = flow("NY-FL", (-150.0, 30.0), (-80.0, 30.0), 7.0);
        load_flows(&mut surface, vec![parent.clone()]);

        let (x, y) = cell_of(surface.viewport(), -150.0, 30.0).unwrap();
        surface.click(x, y);
        assert_eq!(rx.try_recv().unwrap(), SurfaceEvent::Select(parent));

        surface.click(0, 0);
        assert_eq!(rx.try_recv().unwrap(), SurfaceEvent::Deselect);
    }

    #[test]
    fn overlay_layers_follow_level_and_stay_below_state_borders() {
        let (mut surface, _rx) = ready_surface();
        surface.set_boundaries(GeoLevel::County, states(), Some(empty_collection()));
        let engine = surface.engine().unwrap();
        assert!(engine.layer_index(COUNTY_BORDER_LAYER).unwrap() < engine.layer_index(STATE_BORDER_LAYER).unwrap());

        surface.set_choropleth(Some(states()));
        surface.set_boundaries(GeoLevel::Congress, states(), None);
        let engine = surface.engine().unwrap();
        assert!(!engine.has_layer(COUNTY_BORDER_LAYER));
        let ids: Vec<&str> = engine.layers().iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec![CHOROPLETH_LAYER, DISTRICT_BORDER_LAYER, STATE_BORDER_LAYER]);

        surface.set_boundaries(GeoLevel::State, empty_collection(), None);
        let engine = surface.engine().unwrap();
        assert!(!engine.has_layer(DISTRICT_BORDER_LAYER));
        assert!(engine.source(STATE_SOURCE).unwrap().data.features.is_empty());
    }

    #[test]
    fn viewport_fits_state_bounds() {
        let (mut surface, _rx) = ready_surface();
        surface.set_boundaries(GeoLevel::State, states(), None);
        let vp = surface.viewport();
        assert_eq!(vp.x_bounds, [-124.0, -114.0]);
        assert_eq!(vp.y_bounds, [32.5, 42.0]);
        let (lon, lat) = vp.to_lonlat(0, 0);
        assert!(lon < -123.0 && lat > 41.0);
    }

    #[test]
    fn antimeridian_segments_are_split() {
        let g = split_antimeridian(LineString::from(vec![(179.5, 10.0), (-179.5, 10.0), (-179.0, 10.0)]));
        match g {
            Geometry::MultiLineString(m) => assert_eq!(m.0.len(), 2),
            other => panic!("expected split, got {:?}", other),
        }
    }
}
