/// Wygięcie łuku jako ułamek długości cięciwy
pub const CURVE_FACTOR: f64 = 0.2;

/// Maksymalne odsunięcie punktu kontrolnego (w stopniach), żeby długie łuki
/// przez cały kontynent nie puchły
pub const MAX_OFFSET: f64 = 8.0;

/// Sprowadza długość geograficzną do [-180, 180]
pub fn normalize_lon(lon: f64) -> f64 {
    if (-180.0..=180.0).contains(&lon) {
        lon
    } else {
        (lon + 180.0).rem_euclid(360.0) - 180.0
    }
}

/// Kwadratowa krzywa Béziera między dwoma punktami (lon, lat).
///
/// Zwraca zawsze `segments + 1` punktów: pierwszy to początek, ostatni koniec.
/// Punkt kontrolny leży na symetralnej cięciwy, po jej lewej stronie patrząc
/// od początku do końca. Gdy różnica długości przekracza 180°, krótsza droga
/// biegnie przez antypołudnik – wtedy koniec przesuwamy o ±360°, a wynik
/// normalizujemy z powrotem.
pub fn curve(lon1: f64, lat1: f64, lon2: f64, lat2: f64, segments: usize) -> Vec<(f64, f64)> {
    let segments = segments.max(1);

    let mut lon2 = lon2;
    let dlon = lon2 - lon1;
    if dlon > 180.0 {
        lon2 -= 360.0;
    } else if dlon < -180.0 {
        lon2 += 360.0;
    }

    let dx = lon2 - lon1;
    let dy = lat2 - lat1;
    let dist = (dx * dx + dy * dy).sqrt();

    if dist == 0.0 {
        return vec![(normalize_lon(lon1), lat1); segments + 1];
    }

    let offset = (dist * CURVE_FACTOR).min(MAX_OFFSET);
    // obrót wektora kierunku o 90°
    let cx = (lon1 + lon2) / 2.0 - dy / dist * offset;
    let cy = (lat1 + lat2) / 2.0 + dx / dist * offset;

    (0..=segments)
        .map(|i| {
            let t = i as f64 / segments as f64;
            let u = 1.0 - t;
            let lon = u * u * lon1 + 2.0 * u * t * cx + t * t * lon2;
            let lat = u * u * lat1 + 2.0 * u * t * cy + t * t * lat2;
            (normalize_lon(lon), lat)
        })
        .collect()
}
