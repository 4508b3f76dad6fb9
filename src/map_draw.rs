use geo::{Geometry, LineString};
use geojson::Feature;
use ratatui::{
    Frame,
    layout::Rect as TuiRect,
    style::{Color, Style},
    symbols::Marker,
    widgets::{
        Block, Borders,
        canvas::{Canvas, Context, Line, Points},
    },
};

use crate::{
    project::Rgb,
    surface::{LayerKind, MapSurface, STATE_BORDER_LAYER},
};

/// Kolor z właściwości obiektu (`#rrggbb`), inaczej domyślny
fn feature_color(feature: &Feature, key: &str, fallback: Color) -> Color {
    feature
        .property(key)
        .and_then(|v| v.as_str())
        .and_then(Rgb::from_hex)
        .map(|Rgb(r, g, b)| Color::Rgb(r, g, b))
        .unwrap_or(fallback)
}

fn draw_line_string(ctx: &mut Context, line: &LineString<f64>, color: Color) {
    for window in line.0.windows(2) {
        let a = window[0];
        let b = window[1];
        ctx.draw(&Line { x1: a.x, y1: a.y, x2: b.x, y2: b.y, color });
    }
}

fn draw_geometry(ctx: &mut Context, geom: &Geometry<f64>, color: Color) {
    match geom {
        Geometry::LineString(ls) => draw_line_string(ctx, ls, color),
        Geometry::MultiLineString(mls) => mls.0.iter().for_each(|ls| draw_line_string(ctx, ls, color)),
        // pierścień zewnętrzny jest domknięty, więc okna(2) obejmują ostatnią krawędź
        Geometry::Polygon(p) => draw_line_string(ctx, p.exterior(), color),
        Geometry::MultiPolygon(mp) => mp.0.iter().for_each(|p| draw_line_string(ctx, p.exterior(), color)),
        Geometry::Point(p) => ctx.draw(&Points { coords: &[(p.x(), p.y())], color }),
        Geometry::MultiPoint(mp) => {
            let coords: Vec<(f64, f64)> = mp.0.iter().map(|p| (p.x(), p.y())).collect();
            ctx.draw(&Points { coords: &coords, color });
        }
        _ => {}
    }
}

/// Rysowanie powierzchni mapy na Canvas: warstwy od spodu, każda na osobnej warstwie Canvas
pub struct MapView<'a> {
    surface: &'a MapSurface,
}

impl<'a> MapView<'a> {
    pub fn new(surface: &'a MapSurface) -> Self {
        Self { surface }
    }

    /// Liczba narysowanych przepływów (do tytułu)
    pub fn flow_count(&self) -> usize {
        self.surface.displayed().len()
    }

    pub fn render(&self, f: &mut Frame, area: TuiRect, title: &str, focused: bool, highlight: Option<&str>) {
        let vp = self.surface.viewport();
        let border_style = if focused { Style::default().fg(Color::Red) } else { Style::default() };
        let canvas = Canvas::default()
            .block(Block::default().title(title).borders(Borders::ALL).border_style(border_style))
            .marker(Marker::Braille)
            .x_bounds(vp.x_bounds)
            .y_bounds(vp.y_bounds)
            .paint(|ctx| {
                let Some(engine) = self.surface.engine() else {
                    return;
                };
                for layer in engine.layers() {
                    let Some(source) = engine.source(&layer.source) else {
                        continue;
                    };
                    for (feature, geom) in source.iter() {
                        let color = match layer.kind {
                            LayerKind::Border if layer.id == STATE_BORDER_LAYER => Color::White,
                            LayerKind::Border => Color::DarkGray,
                            LayerKind::Fill => feature_color(feature, "fill", Color::DarkGray),
                            LayerKind::Circle => feature_color(feature, "color", Color::White),
                            LayerKind::Line => {
                                let flow_id = feature.property("flow_id").and_then(|v| v.as_str());
                                if highlight.is_some() && flow_id == highlight {
                                    Color::Yellow
                                } else {
                                    feature_color(feature, "color", Color::Cyan)
                                }
                            }
                        };
                        draw_geometry(ctx, geom, color);
                    }
                    ctx.layer();
                }
            });
        f.render_widget(canvas, area);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn colors_come_from_properties() {
        let feature: Feature = serde_json::from_value(json!({
            "type": "Feature",
            "properties": { "color": "#e6550d", "fill": "bad" },
            "geometry": null
        }))
        .unwrap();
        assert_eq!(feature_color(&feature, "color", Color::White), Color::Rgb(0xe6, 0x55, 0x0d));
        assert_eq!(feature_color(&feature, "fill", Color::DarkGray), Color::DarkGray);
        assert_eq!(feature_color(&feature, "missing", Color::Cyan), Color::Cyan);
    }
}
