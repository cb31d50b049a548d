use crate::model::EntityType;

/// Recognizer labels that map into the story taxonomy. Everything else is dropped.
const LABEL_TABLE: &[(&str, EntityType)] = &[
    ("PERSON", EntityType::Character),
    // geopolitical entity
    ("GPE", EntityType::Location),
    ("LOC", EntityType::Location),
    ("ORG", EntityType::Organization),
    // facility
    ("FAC", EntityType::Location),
    ("PRODUCT", EntityType::Item),
    ("EVENT", EntityType::Concept),
    ("WORK_OF_ART", EntityType::Concept),
    // nationalities, religious and political groups
    ("NORP", EntityType::Concept),
];

pub fn map_label(label: &str) -> Option<EntityType> {
    LABEL_TABLE
        .iter()
        .find(|(known, _)| *known == label)
        .map(|(_, entity_type)| *entity_type)
}

pub fn known_labels() -> impl Iterator<Item = &'static str> {
    LABEL_TABLE.iter().map(|(label, _)| *label)
}
