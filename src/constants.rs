/// Curated reference tables shared across the pipeline stages.
/// These are fixed per release; none of them is mutated at runtime.
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Prefix that turns a bare exclusion-list entry into a virus name
pub const SEQUENCE_NAME_PREFIX: &str = "hCoV-19/";

/// Collection dates must compare strictly after this day
pub const EARLIEST_COLLECTION_DATE: &str = "2019-12-01";

/// Columns the metadata export must carry before anything else runs
pub const REQUIRED_METADATA_COLUMNS: [&str; 22] = [
    "Virus name",
    "Type",
    "Accession ID",
    "Collection date",
    "Location",
    "Additional location information",
    "Sequence length",
    "Host",
    "Patient age",
    "Gender",
    "Clade",
    "Pango lineage",
    "Pangolin version",
    "Variant",
    "AA Substitutions",
    "Submission date",
    "Is reference?",
    "Is complete?",
    "Is high coverage?",
    "Is low coverage?",
    "N-Content",
    "GC-Content",
];

// Synthetic lineage bucket and rollup labels
pub const ALL_LINEAGES: &str = "All lineages";
pub const OTHER_LINEAGES: &str = "Other lineages";
pub const WHO_OTHER: &str = "who_other";
pub const GLOBAL_LOCATION: &str = "Global";
pub const WHO_REGION_PREFIX: &str = "WHO Region: ";

/// External series rows carrying these iso codes are pre-computed aggregates
pub const EXTERNAL_AGGREGATE_ISO_CODES: [&str; 9] = [
    "OWID_AFR", // Africa
    "OWID_ASI", // Asia
    "OWID_EUR", // Europe
    "OWID_EUN", // European Union
    "OWID_INT", // International
    "OWID_NAM", // North America
    "OWID_OCE", // Oceania
    "OWID_SAM", // South America
    "OWID_WRL", // World
];

/// Aggregate series that publish their own vaccination shares, and the
/// rollup row each one stands for
pub const REGIONAL_VACCINATION_SOURCES: [(&str, &str); 7] = [
    ("OWID_AFR", "Africa"),
    ("OWID_ASI", "Asia"),
    ("OWID_EUR", "Europe"),
    ("OWID_NAM", "North America"),
    ("OWID_OCE", "Oceania"),
    ("OWID_SAM", "South America"),
    ("OWID_WRL", GLOBAL_LOCATION),
];

/// Words left untouched when title-casing country names
pub const TITLECASE_EXCEPTIONS: [&str; 7] = ["and", "or", "the", "a", "of", "in", "d'Ivoire"];

/// WHO greek-letter groupings. A trailing `*` covers every sub-lineage of the prefix.
pub const GREEK_LINEAGES: [(&str, &[&str]); 6] = [
    ("who_alpha", &["B.1.1.7", "Q.*"]),
    ("who_beta", &["B.1.351", "B.1.351.2", "B.1.351.3", "B.1.351.4", "B.1.351.5"]),
    ("who_gamma", &["P.1", "P.1.*"]),
    ("who_delta", &["B.1.617.2", "AY.*"]),
    ("who_omicron", &["B.1.1.529", "B.1.1.529.*", "BA.*"]),
    (
        "who_allvois",
        &[
            "C.37", "C.37.1", // lambda
            "B.1.621", "B.1.621.1", // mu
        ],
    ),
];

/// Lineages broken out as their own columns besides the greek groupings
pub const OTHER_TRACKED_LINEAGES: [&str; 10] = [
    "B.1.617.3", // CDC VUM
    "B.1.427", "B.1.429", "B.1.427/429", // epsilon
    "B.1.525",   // eta
    "B.1.526", "B.1.526.*", // iota
    "B.1.617.1", // kappa
    "P.2",       // zeta
    "P.3",       // theta
];

/// Lineages collapsed into one shared column; takes precedence over the breakout above
pub static LINEAGE_ALIASES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([("B.1.427", "B.1.427/429"), ("B.1.429", "B.1.427/429")])
});

/// Country spellings in the metadata mapped onto the external series vocabulary.
/// Anything containing "usa" is handled separately.
pub static COUNTRY_CORRECTIONS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("Puerto Rico", "United States"),
        ("Guam", "United States"),
        ("Northern Mariana Islands", "United States"),
        ("U.s. Virgin Islands", "United States"),
        ("Czech Republic", "Czechia"),
        ("Antigua", "Antigua and Barbuda"),
        ("Democratic Republic of the Congo", "Democratic Republic of Congo"),
        ("Republic of the Congo", "Congo"),
        ("Faroe Islands", "Faeroe Islands"),
        ("Guinea Bissau", "Guinea-Bissau"),
        ("Niogeria", "Nigeria"),
        ("Bosni and Herzegovina", "Bosnia and Herzegovina"),
        ("England", "United Kingdom"),
        ("The Bahamas", "Bahamas"),
    ])
});

/// Every curated lineage entry: variants of concern, of interest, then the other tracked ones
pub fn tracked_lineages() -> Vec<&'static str> {
    GREEK_LINEAGES
        .iter()
        .flat_map(|(_, codes)| codes.iter().copied())
        .chain(OTHER_TRACKED_LINEAGES.iter().copied())
        .collect()
}

/// Resolve a lineage to its alias bucket, if one is defined
pub fn lineage_alias(lineage: &str) -> Option<&'static str> {
    LINEAGE_ALIASES.get(lineage).copied()
}
