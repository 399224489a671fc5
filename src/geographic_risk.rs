//! Geographic risk reference data
//!
//! Canonical Spanish-locale country names, the high-risk destination lists and
//! a stable per-country display colour.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Destinations whose transfers are high risk on their own
pub const HIGH_RISK_DESTINATIONS: &[&str] = &[
    "República Popular Democrática de Corea",
    "Irán",
    "Myanmar",
    "África del Sur",
    "Bulgaria",
    "Burkina Faso",
    "Camerún",
    "Croacia",
    "Filipinas",
    "Haití",
    "Kenia",
    "Mali",
    "Mozambique",
    "Namibia",
    "Nigeria",
    "República Democrática del Congo",
    "Senegal",
    "Siria",
    "Sudán del Sur",
    "Tanzania",
    "Turquía",
    "Vietnam",
    "Yemen",
    "Venezuela",
    "Mónaco",
    "Anguila",
    "Bahrein",
    "Barbados",
    "Bermudas",
    "Dominica",
    "Fiji",
    "Gibraltar",
    "Guam",
    "Guernsey",
    "Isla de Man",
    "Islas Caimán",
    "Islas Malvinas",
    "Islas Marianas",
    "Islas Salomón",
    "Islas Turcas y Caicos",
    "Islas Vírgenes Británicas",
    "Islas Vírgenes de Estados Unidos de América",
    "Jersey",
    "Palaos",
    "Samoa",
    "Samoa Americana",
    "Seychelles",
    "Trinidad y Tobago",
    "Vanuatu",
];

/// Wider corridor list used for client-level exposure
pub const HIGH_RISK_CORRIDORS: &[&str] = &[
    "República Popular Democrática de Corea",
    "Irán",
    "Myanmar",
    "África del Sur",
    "Bulgaria",
    "Burkina Faso",
    "Camerún",
    "Croacia",
    "Filipinas",
    "Haití",
    "Kenia",
    "Mali",
    "Mozambique",
    "Namibia",
    "Nigeria",
    "República Democrática del Congo",
    "Senegal",
    "Siria",
    "Sudán del Sur",
    "Tanzania",
    "Turquía",
    "Vietnam",
    "Yemen",
    "Venezuela",
    "Mónaco",
    "Anguila",
    "Bahrein",
    "Barbados",
    "Bermudas",
    "Dominica",
    "Fiji",
    "Gibraltar",
    "Guam",
    "Guernsey",
    "Isla de Man",
    "Islas Caimán",
    "Islas Turcas y Caicos",
    "Jersey",
    "Jordania",
    "Líbano",
    "Malasia",
    "Maldivas",
    "Marruecos",
    "Pakistán",
    "Panamá",
    "Puerto Rico",
    "Samoa Americana",
    "San Bartolomé",
    "San Cristóbal y Nieves",
    "Santa Lucía",
    "San Vicente y las Granadinas",
    "Tailandia",
    "Trinidad y Tobago",
    "Emiratos Árabes Unidos",
    "Vanuatu",
    "Zimbabue",
    "Albania",
    "Armenia",
    "Bosnia y Herzegovina",
    "Colombia",
    "Jamaica",
    "Kosovo",
    "Macedonia del Norte",
    "Montenegro",
    "Serbia",
];

/// Country names as written in Spanish-locale territory tables
pub const CANONICAL_COUNTRIES: &[&str] = &[
    "Afganistán", "Albania", "Alemania", "Andorra", "Angola", "Anguila", "Antártida",
    "Antigua y Barbuda", "Arabia Saudí", "Argelia", "Argentina", "Armenia", "Aruba",
    "Australia", "Austria", "Azerbaiyán", "Bahamas", "Bangladés", "Barbados", "Baréin",
    "Bélgica", "Belice", "Benín", "Bermudas", "Bielorrusia", "Bolivia",
    "Bosnia y Herzegovina", "Botsuana", "Brasil", "Brunéi", "Bulgaria", "Burkina Faso",
    "Burundi", "Bután", "Cabo Verde", "Camboya", "Camerún", "Canadá", "Caribe neerlandés",
    "Catar", "Chad", "Chequia", "Chile", "China", "Chipre", "Ciudad del Vaticano",
    "Colombia", "Comoras", "Congo", "Corea del Norte", "Corea del Sur", "Costa Rica",
    "Côte d’Ivoire", "Croacia", "Cuba", "Curazao", "Dinamarca", "Dominica", "Ecuador",
    "Egipto", "El Salvador", "Emiratos Árabes Unidos", "Eritrea", "Eslovaquia",
    "Eslovenia", "España", "Estados Unidos", "Estonia", "Esuatini", "Etiopía", "Filipinas",
    "Finlandia", "Fiyi", "Francia", "Gabón", "Gambia", "Georgia", "Ghana", "Gibraltar",
    "Granada", "Grecia", "Groenlandia", "Guadalupe", "Guam", "Guatemala",
    "Guayana Francesa", "Guernesey", "Guinea", "Guinea Ecuatorial", "Guinea-Bisáu",
    "Guyana", "Haití", "Honduras", "Hungría", "India", "Indonesia", "Irak", "Irán",
    "Irlanda", "Isla Bouvet", "Isla de Man", "Isla de Navidad", "Isla Norfolk", "Islandia",
    "Islas Aland", "Islas Caimán", "Islas Cocos", "Islas Cook", "Islas Feroe",
    "Islas Georgia del Sur y Sandwich del Sur", "Islas Heard y McDonald",
    "Islas Malvinas", "Islas Marianas del Norte", "Islas Marshall", "Islas menores alejadas de EE. UU.",
    "Islas Pitcairn", "Islas Salomón", "Islas Turcas y Caicos",
    "Islas Vírgenes Británicas", "Islas Vírgenes de EE. UU.", "Israel", "Italia",
    "Jamaica", "Japón", "Jersey", "Jordania", "Kazajistán", "Kenia", "Kirguistán",
    "Kiribati", "Kosovo", "Kuwait", "Laos", "Lesoto", "Letonia", "Líbano", "Liberia",
    "Libia", "Liechtenstein", "Lituania", "Luxemburgo", "Macedonia del Norte",
    "Madagascar", "Malasia", "Malaui", "Maldivas", "Mali", "Malta", "Marruecos",
    "Martinica", "Mauricio", "Mauritania", "Mayotte", "México", "Micronesia", "Moldavia",
    "Mónaco", "Mongolia", "Montenegro", "Montserrat", "Mozambique", "Myanmar (Birmania)",
    "Namibia", "Nauru", "Nepal", "Nicaragua", "Níger", "Nigeria", "Niue", "Noruega",
    "Nueva Caledonia", "Nueva Zelanda", "Omán", "Países Bajos", "Pakistán", "Palaos",
    "Panamá", "Papúa Nueva Guinea", "Paraguay", "Perú", "Polinesia Francesa", "Polonia",
    "Portugal", "Puerto Rico", "Reino Unido", "República Centroafricana",
    "República Democrática del Congo", "República Dominicana", "Reunión", "Ruanda",
    "Rumanía", "Rusia", "Sáhara Occidental", "Samoa", "Samoa Americana", "San Bartolomé",
    "San Cristóbal y Nieves", "San Marino", "San Martín", "San Pedro y Miquelón",
    "San Vicente y las Granadinas", "Santa Elena", "Santa Lucía", "Santo Tomé y Príncipe",
    "Senegal", "Serbia", "Seychelles", "Sierra Leona", "Singapur", "Sint Maarten", "Siria",
    "Somalia", "Sri Lanka", "Sudáfrica", "Sudán", "Sudán del Sur", "Suecia", "Suiza",
    "Surinam", "Svalbard y Jan Mayen", "Tailandia", "Taiwán", "Tanzania", "Tayikistán",
    "Territorio Británico del Océano Índico", "Territorios Australes Franceses",
    "Territorios Palestinos", "Timor-Leste", "Togo", "Tokelau", "Tonga",
    "Trinidad y Tobago", "Túnez", "Turkmenistán", "Turquía", "Tuvalu", "Ucrania", "Uganda",
    "Uruguay", "Uzbekistán", "Vanuatu", "Venezuela", "Vietnam", "Wallis y Futuna", "Yemen",
    "Yibuti", "Zambia", "Zimbabue",
];

/// Case-insensitive membership list of country names
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CountryRiskList {
    countries: HashSet<String>,
}

impl CountryRiskList {
    pub fn new<I, S>(countries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            countries: countries.into_iter().map(|c| normalize_country(c.as_ref())).collect(),
        }
    }

    pub fn contains(&self, country: &str) -> bool {
        self.countries.contains(&normalize_country(country))
    }

    pub fn len(&self) -> usize {
        self.countries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.countries.is_empty()
    }
}

/// Comparison form of a country name
pub fn normalize_country(country: &str) -> String {
    country.trim().to_uppercase()
}

/// Stable `#rrggbb` colour for a country; `#CCCCCC` when unknown.
///
/// Hue comes from the SHA-256 digest of the normalized name; saturation and
/// value stay within the bands that keep labels readable.
pub fn color_for(country: &str) -> String {
    let normalized = normalize_country(country);
    if normalized.is_empty() {
        return "#CCCCCC".to_string();
    }

    let digest = Sha256::digest(normalized.as_bytes());
    let unit = |hi: u8, lo: u8| f64::from(u16::from_be_bytes([hi, lo])) / f64::from(u16::MAX);

    let hue = unit(digest[0], digest[1]);
    let saturation = 0.6 + 0.3 * unit(digest[2], digest[3]);
    let value = 0.5 + 0.3 * unit(digest[4], digest[5]);

    let (r, g, b) = hsv_to_rgb(hue, saturation, value);
    format!("#{:02x}{:02x}{:02x}", r, g, b)
}

fn hsv_to_rgb(h: f64, s: f64, v: f64) -> (u8, u8, u8) {
    let sector = (h * 6.0).floor();
    let f = h * 6.0 - sector;
    let p = v * (1.0 - s);
    let q = v * (1.0 - f * s);
    let t = v * (1.0 - (1.0 - f) * s);

    let (r, g, b) = match (sector as i64).rem_euclid(6) {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    };
    let channel = |c: f64| (c * 255.0).round().clamp(0.0, 255.0) as u8;
    (channel(r), channel(g), channel(b))
}
