//! Keyword category classifier.
//!
//! Assigns each tender one category from a fixed taxonomy by counting
//! keyword hits over the title, objeto, and the head of the description.
//! Most hits wins; ties break by taxonomy order, so the earlier (more
//! specific) category prevails. No hits leaves the record uncategorized
//! rather than guessing.

use std::sync::LazyLock;

use regex::Regex;

use crate::models::TenderRecord;

/// Description window considered for classification.
const DESCRIPTION_WINDOW: usize = 500;

/// Fixed taxonomy, in tie-break priority order.
const TAXONOMY: &[(&str, &[&str])] = &[
    (
        "obra_publica",
        &[
            "obra", "construccion", "refaccion", "remodelacion", "pavimento",
            "pavimentacion", "bacheo", "cloaca", "acueducto", "edificio",
            "ampliacion", "vivienda", "ruta", "puente",
        ],
    ),
    (
        "salud",
        &[
            "hospital", "medicamento", "insumo medico", "descartable",
            "ambulancia", "quirurgico", "laboratorio", "reactivo", "vacuna",
            "protesis", "odontologic",
        ],
    ),
    (
        "tecnologia",
        &[
            "software", "hardware", "informatic", "computadora", "notebook",
            "servidor", "licencia", "fibra optica", "conectividad", "red de datos",
            "impresora", "camara", "videovigilancia",
        ],
    ),
    (
        "alimentos",
        &[
            "alimento", "comedor", "vianda", "leche", "carne", "fruta",
            "verdura", "racionamiento", "catering",
        ],
    ),
    (
        "transporte",
        &[
            "vehiculo", "camion", "camioneta", "utilitario", "combustible",
            "neumatico", "repuesto", "maquinaria vial", "colectivo",
        ],
    ),
    (
        "servicios",
        &[
            "limpieza", "seguridad", "vigilancia", "mantenimiento", "seguro",
            "transporte escolar", "fotocopiado", "fumigacion", "recoleccion",
            "alquiler",
        ],
    ),
    (
        "suministros",
        &[
            "provision", "adquisicion", "suministro", "libreria", "papel",
            "indumentaria", "mobiliario", "herramienta", "material",
        ],
    ),
];

static COMPILED: LazyLock<Vec<(&'static str, Vec<Regex>)>> = LazyLock::new(|| {
    TAXONOMY
        .iter()
        .map(|(category, keywords)| {
            let patterns = keywords
                .iter()
                .filter_map(|keyword| crate::nodos::compile_keyword(keyword))
                .collect();
            (*category, patterns)
        })
        .collect()
});

/// Classify a record, returning the category or None when nothing hits.
pub fn classify(record: &TenderRecord) -> Option<&'static str> {
    let mut text = record.title.clone();
    if let Some(objeto) = &record.objeto {
        text.push('\n');
        text.push_str(objeto);
    }
    if let Some(description) = &record.description {
        text.push('\n');
        text.extend(description.chars().take(DESCRIPTION_WINDOW));
    }

    let mut best: Option<(&'static str, usize)> = None;
    for (category, patterns) in COMPILED.iter() {
        let hits = patterns.iter().filter(|p| p.is_match(&text)).count();
        if hits > 0 && best.is_none_or(|(_, top)| hits > top) {
            best = Some((category, hits));
        }
    }
    best.map(|(category, _)| category)
}

/// Set the category when classification produced one; an already assigned
/// category is only replaced, never cleared.
pub fn classify_into(record: &mut TenderRecord) -> bool {
    match classify(record) {
        Some(category) if record.category.as_deref() != Some(category) => {
            record.category = Some(category.to_string());
            true
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(title: &str, objeto: Option<&str>) -> TenderRecord {
        let mut record = TenderRecord::new("src", title);
        record.objeto = objeto.map(str::to_string);
        record
    }

    #[test]
    fn test_classify_obra() {
        let r = record("Obra: refacción integral escuela N°4", None);
        assert_eq!(classify(&r), Some("obra_publica"));
    }

    #[test]
    fn test_classify_accent_tolerant() {
        let r = record("ADQUISICION DE MEDICAMENTOS E INSUMOS MEDICOS", None);
        assert_eq!(classify(&r), Some("salud"));
    }

    #[test]
    fn test_classify_uses_objeto() {
        let r = record(
            "LICITACION PUBLICA 12/2024",
            Some("provisión de fibra óptica y conectividad para escuelas"),
        );
        assert_eq!(classify(&r), Some("tecnologia"));
    }

    #[test]
    fn test_most_hits_wins() {
        // One suministros hit ("adquisición") against two salud hits.
        let r = record("Adquisición de medicamentos para hospital regional", None);
        assert_eq!(classify(&r), Some("salud"));
    }

    #[test]
    fn test_no_hits_no_category() {
        let r = record("EDICTO JUDICIAL", None);
        assert_eq!(classify(&r), None);
    }

    #[test]
    fn test_classify_into_never_clears() {
        let mut r = record("EDICTO JUDICIAL", None);
        r.category = Some("servicios".to_string());
        assert!(!classify_into(&mut r));
        assert_eq!(r.category.as_deref(), Some("servicios"));
    }
}
