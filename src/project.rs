use geojson::{Feature, FeatureCollection, Geometry, JsonObject, Value, feature::Id};
use serde_json::json;
use std::collections::HashMap;

use crate::{curve::curve, data::VisualFlow, flows::Direction};

pub const DEFAULT_SEGMENTS: usize = 32;

const MIN_WIDTH: f64 = 1.0;
const MAX_WIDTH: f64 = 6.0;

pub const ORIGIN_COLOR: Rgb = Rgb(0x1b, 0x9e, 0x77);
pub const DEST_COLOR: Rgb = Rgb(0xd9, 0x5f, 0x02);
pub const OUTFLOW_COLOR: Rgb = Rgb(0xe6, 0x55, 0x0d);
pub const INFLOW_COLOR: Rgb = Rgb(0x31, 0x82, 0xbd);
pub const MIXED_COLOR: Rgb = Rgb(0x9e, 0x9a, 0xc8);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.0, self.1, self.2)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let s = s.strip_prefix('#')?;
        if s.len() != 6 {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(s.get(i..i + 2)?, 16).ok();
        Some(Rgb(channel(0)?, channel(2)?, channel(4)?))
    }

    pub fn lerp(self, other: Rgb, t: f64) -> Rgb {
        let t = t.clamp(0.0, 1.0);
        let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * t).round() as u8;
        Rgb(mix(self.0, other.0), mix(self.1, other.1), mix(self.2, other.2))
    }
}

/// Skala normalizacji kwot
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum AmountScale {
    #[default]
    Linear,
    Log10,
}

impl AmountScale {
    pub fn next(&self) -> Self {
        match self {
            AmountScale::Linear => AmountScale::Log10,
            AmountScale::Log10  => AmountScale::Linear,
        }
    }

    fn apply(&self, amount: f64) -> f64 {
        match self {
            AmountScale::Linear => amount,
            AmountScale::Log10  => amount.max(1.0).log10(),
        }
    }
}

/// Zakres kwot w aktualnie pokazywanym zbiorze
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AmountRange {
    pub min: f64,
    pub max: f64,
}

impl AmountRange {
    pub fn of(flows: &[VisualFlow]) -> Self {
        let (min, max) = flows
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), f| (lo.min(f.amount), hi.max(f.amount)));
        if min.is_finite() { Self { min, max } } else { Self { min: 0.0, max: 0.0 } }
    }

    /// Wartość w [0, 1]; przy zerowej rozpiętości 0.5
    pub fn normalize(&self, amount: f64, scale: AmountScale) -> f64 {
        let lo = scale.apply(self.min);
        let hi = scale.apply(self.max);
        let span = hi - lo;
        if span.abs() < f64::EPSILON {
            return 0.5;
        }
        ((scale.apply(amount) - lo) / span).clamp(0.0, 1.0)
    }
}

pub fn stroke_width(norm: f64) -> f64 {
    MIN_WIDTH + norm * (MAX_WIDTH - MIN_WIDTH)
}

fn stroke_opacity(norm: f64) -> f64 {
    0.35 + 0.6 * norm
}

/// Rola przepływu względem wybranego stanu
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowRole {
    Outflow,
    Inflow,
    Mixed,
}

impl FlowRole {
    pub fn color(&self) -> Rgb {
        match self {
            FlowRole::Outflow => OUTFLOW_COLOR,
            FlowRole::Inflow  => INFLOW_COLOR,
            FlowRole::Mixed   => MIXED_COLOR,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FlowRole::Outflow => "outflow",
            FlowRole::Inflow  => "inflow",
            FlowRole::Mixed   => "mixed",
        }
    }
}

pub fn classify(flow: &VisualFlow, focus: &str, direction: Direction) -> FlowRole {
    match direction {
        Direction::Origin      => FlowRole::Outflow,
        Direction::Destination => FlowRole::Inflow,
        Direction::All => match (flow.origin_state == focus, flow.dest_state == focus) {
            (true, false) => FlowRole::Outflow,
            (false, true) => FlowRole::Inflow,
            _ => FlowRole::Mixed,
        },
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProjectOptions {
    pub segments: usize,
    pub scale: AmountScale,
}

impl Default for ProjectOptions {
    fn default() -> Self {
        Self { segments: DEFAULT_SEGMENTS, scale: AmountScale::Linear }
    }
}

fn base_properties(flow: &VisualFlow, norm: f64) -> JsonObject {
    let mut props = JsonObject::new();
    props.insert("flow_id".into(), json!(flow.id));
    props.insert("origin".into(), json!(flow.origin_name));
    props.insert("dest".into(), json!(flow.dest_name));
    props.insert("amount".into(), json!(flow.amount));
    props.insert("agency".into(), json!(flow.agency));
    props.insert("norm".into(), json!(norm));
    props.insert("width".into(), json!(stroke_width(norm)));
    props.insert("opacity".into(), json!(stroke_opacity(norm)));
    props
}

fn line_feature(id: String, coords: Vec<Vec<f64>>, properties: JsonObject) -> Feature {
    Feature {
        bbox: None,
        geometry: Some(Geometry::new(Value::LineString(coords))),
        id: Some(Id::String(id)),
        properties: Some(properties),
        foreign_members: None,
    }
}

/// Przepływy → linie GeoJSON.
///
/// Bez wybranego stanu każdy łuk jest pocięty na krótkie odcinki z kolorem
/// interpolowanym od początku do końca (gradient kierunku). Odcinek ma id
/// `<flow_id>::<i>` i właściwość `flow_id` rodzica. Z wybranym stanem łuk to
/// jedna linia w kolorze roli (wypływ / wpływ / mieszany).
pub fn project(
    flows: &[VisualFlow],
    range: AmountRange,
    focus: Option<&str>,
    direction: Direction,
    opts: ProjectOptions,
) -> FeatureCollection {
    let mut features = Vec::new();

    for flow in flows {
        let norm = range.normalize(flow.amount, opts.scale);
        let points = curve(flow.origin_lon, flow.origin_lat, flow.dest_lon, flow.dest_lat, opts.segments);

        match focus {
            Some(focus) => {
                let role = classify(flow, focus, direction);
                let mut props = base_properties(flow, norm);
                props.insert("role".into(), json!(role.as_str()));
                props.insert("color".into(), json!(role.color().to_hex()));
                let coords = points.iter().map(|&(lon, lat)| vec![lon, lat]).collect();
                features.push(line_feature(flow.id.clone(), coords, props));
            }
            None => {
                let n = points.len().saturating_sub(1).max(1);
                for (i, pair) in points.windows(2).enumerate() {
                    let t = (i as f64 + 0.5) / n as f64;
                    let mut props = base_properties(flow, norm);
                    props.insert("role".into(), json!("gradient"));
                    props.insert("segment".into(), json!(i));
                    props.insert("color".into(), json!(ORIGIN_COLOR.lerp(DEST_COLOR, t).to_hex()));
                    let coords = vec![vec![pair[0].0, pair[0].1], vec![pair[1].0, pair[1].1]];
                    features.push(line_feature(format!("{}::{}", flow.id, i), coords, props));
                }
            }
        }
    }

    FeatureCollection { bbox: None, features, foreign_members: None }
}

/// Punkty końcowe: jeden na lokalizację, z rolą origin / destination / both
pub fn endpoints(flows: &[VisualFlow]) -> FeatureCollection {
    struct Endpoint {
        lon: f64,
        lat: f64,
        origin: bool,
        dest: bool,
        amount: f64,
    }

    let mut order: Vec<String> = Vec::new();
    let mut points: HashMap<String, Endpoint> = HashMap::new();
    let mut touch = |name: &str, lon: f64, lat: f64, amount: f64, is_origin: bool| {
        let e = points.entry(name.to_string()).or_insert_with(|| {
            order.push(name.to_string());
            Endpoint { lon, lat, origin: false, dest: false, amount: 0.0 }
        });
        e.amount += amount;
        if is_origin { e.origin = true } else { e.dest = true }
    };
    for f in flows {
        touch(&f.origin_name, f.origin_lon, f.origin_lat, f.amount, true);
        touch(&f.dest_name, f.dest_lon, f.dest_lat, f.amount, false);
    }

    let features = order
        .into_iter()
        .filter_map(|name| {
            let e = points.remove(&name)?;
            let (role, color) = match (e.origin, e.dest) {
                (true, true)  => ("both", MIXED_COLOR),
                (true, false) => ("origin", ORIGIN_COLOR),
                _             => ("destination", DEST_COLOR),
            };
            let mut props = JsonObject::new();
            props.insert("name".into(), json!(name));
            props.insert("role".into(), json!(role));
            props.insert("color".into(), json!(color.to_hex()));
            props.insert("amount".into(), json!(e.amount));
            Some(Feature {
                bbox: None,
                geometry: Some(Geometry::new(Value::Point(vec![e.lon, e.lat]))),
                id: Some(Id::String(name)),
                properties: Some(props),
                foreign_members: None,
            })
        })
        .collect();

    FeatureCollection { bbox: None, features, foreign_members: None }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow(id: &str, origin: &str, dest: &str, amount: f64) -> VisualFlow {
        VisualFlow {
            id: id.into(),
            origin_name: origin.into(),
            dest_name: dest.into(),
            origin_state: origin.into(),
            dest_state: dest.into(),
            origin_lat: 36.7,
            origin_lon: -119.4,
            dest_lat: 31.0,
            dest_lon: -99.9,
            amount,
            agency: "AgencyX".into(),
        }
    }

    fn prop_f64(f: &Feature, key: &str) -> f64 {
        f.property(key).and_then(serde_json::Value::as_f64).unwrap()
    }

    #[test]
    fn gradient_segments_trace_back_to_parent() {
        let flows = vec![flow("CA-TX-2023-AgencyX", "CA", "TX", 10.0)];
        let fc = project(&flows, AmountRange::of(&flows), None, Direction::All, ProjectOptions { segments: 8, ..Default::default() });

        assert_eq!(fc.features.len(), 8);
        for (i, f) in fc.features.iter().enumerate() {
            assert_eq!(f.id, Some(Id::String(format!("CA-TX-2023-AgencyX::{}", i))));
            assert_eq!(f.property("flow_id").and_then(|v| v.as_str()), Some("CA-TX-2023-AgencyX"));
            assert_eq!(f.property("origin").and_then(|v| v.as_str()), Some("CA"));
        }
        let first = fc.features[0].property("color").and_then(|v| v.as_str()).unwrap();
        let last = fc.features[7].property("color").and_then(|v| v.as_str()).unwrap();
        assert_ne!(first, last);
        // pojedynczy przepływ: min == max
        assert_eq!(prop_f64(&fc.features[0], "norm"), 0.5);
    }

    #[test]
    fn width_is_monotonic_in_amount() {
        let flows = vec![
            flow("a", "CA", "TX", 5.0),
            flow("b", "NY", "FL", 1_000.0),
            flow("c", "WA", "OR", 250.0),
            flow("d", "OH", "MI", 250.0),
        ];
        for scale in [AmountScale::Linear, AmountScale::Log10] {
            let fc = project(&flows, AmountRange::of(&flows), None, Direction::All, ProjectOptions { segments: 4, scale });
            let mut by_flow: Vec<(f64, f64)> = fc
                .features
                .iter()
                .map(|f| (prop_f64(f, "amount"), prop_f64(f, "width")))
                .collect();
            by_flow.sort_by(|a, b| a.0.total_cmp(&b.0));
            assert!(by_flow.windows(2).all(|w| w[0].1 <= w[1].1), "{:?}", scale);
            assert_eq!(by_flow.first().map(|p| p.1), Some(MIN_WIDTH));
            assert_eq!(by_flow.last().map(|p| p.1), Some(MAX_WIDTH));
        }
    }

    #[test]
    fn focus_mode_uses_fixed_role_colors() {
        let flows = vec![flow("out", "CA", "TX", 3.0), flow("in", "NV", "CA", 2.0)];
        let fc = project(&flows, AmountRange::of(&flows), Some("CA"), Direction::All, ProjectOptions::default());

        assert_eq!(fc.features.len(), 2);
        let colors: Vec<&str> = fc.features.iter().map(|f| f.property("color").and_then(|v| v.as_str()).unwrap()).collect();
        assert_eq!(colors, vec![OUTFLOW_COLOR.to_hex(), INFLOW_COLOR.to_hex()]);
        assert_eq!(fc.features[0].id, Some(Id::String("out".into())));

        let mut both = flow("both", "CA", "CA", 1.0);
        both.origin_name = "Los Angeles".into();
        assert_eq!(classify(&both, "CA", Direction::All), FlowRole::Mixed);
        assert_eq!(classify(&flows[1], "CA", Direction::Origin), FlowRole::Outflow);
    }

    #[test]
    fn log_scale_compresses_large_spreads() {
        let range = AmountRange { min: 1.0, max: 1_000_000.0 };
        assert!((range.normalize(1_000.0, AmountScale::Log10) - 0.5).abs() < 1e-9);
        assert!(range.normalize(1_000.0, AmountScale::Linear) < 0.01);
        assert_eq!(AmountRange::of(&[]), AmountRange { min: 0.0, max: 0.0 });
    }

    #[test]
    fn endpoints_are_deduplicated_by_name() {
        let flows = vec![flow("1", "CA", "TX", 3.0), flow("2", "TX", "NY", 2.0), flow("3", "CA", "NY", 1.0)];
        let fc = endpoints(&flows);
        let roles: Vec<(&str, &str)> = fc
            .features
            .iter()
            .map(|f| (f.property("name").and_then(|v| v.as_str()).unwrap(), f.property("role").and_then(|v| v.as_str()).unwrap()))
            .collect();
        assert_eq!(roles, vec![("CA", "origin"), ("TX", "both"), ("NY", "destination")]);
        assert_eq!(prop_f64(&fc.features[1], "amount"), 5.0);
    }

    #[test]
    fn hex_round_trip_and_lerp() {
        assert_eq!(Rgb::from_hex("#1b9e77"), Some(ORIGIN_COLOR));
        assert_eq!(Rgb::from_hex("1b9e77"), None);
        assert_eq!(ORIGIN_COLOR.lerp(DEST_COLOR, 0.0), ORIGIN_COLOR);
        assert_eq!(ORIGIN_COLOR.lerp(DEST_COLOR, 1.0), DEST_COLOR);
    }
}
