//! Approximate grid carbon intensity by country, in g CO2 per kWh.

use log::warn;

/// Used when the region code is not in the table.
pub const WORLD_AVERAGE_G_PER_KWH: f64 = 475.0;

const GRID_INTENSITY: &[(&str, f64)] = &[
    ("AUS", 549.0),
    ("AUT", 111.0),
    ("BEL", 161.0),
    ("BRA", 103.0),
    ("CAN", 128.0),
    ("CHE", 38.0),
    ("CHN", 544.0),
    ("DEU", 381.0),
    ("DNK", 151.0),
    ("ESP", 174.0),
    ("FIN", 79.0),
    ("FRA", 56.0),
    ("GBR", 238.0),
    ("GRC", 351.0),
    ("IND", 708.0),
    ("IRL", 346.0),
    ("ITA", 331.0),
    ("JPN", 485.0),
    ("KOR", 436.0),
    ("MEX", 423.0),
    ("NLD", 328.0),
    ("NOR", 26.0),
    ("POL", 662.0),
    ("PRT", 183.0),
    ("SWE", 13.0),
    ("USA", 379.0),
    ("ZAF", 709.0),
];

/// Table value for `country_code` (ISO 3166 alpha-3, case-insensitive), if known.
pub fn lookup(country_code: &str) -> Option<f64> {
    GRID_INTENSITY
        .iter()
        .find(|(code, _)| code.eq_ignore_ascii_case(country_code))
        .map(|&(_, intensity)| intensity)
}

pub fn intensity_for(country_code: &str) -> f64 {
    lookup(country_code).unwrap_or_else(|| {
        warn!(
            "No grid intensity for region {}, using world average {} gCO2/kWh",
            country_code, WORLD_AVERAGE_G_PER_KWH
        );
        WORLD_AVERAGE_G_PER_KWH
    })
}
