use std::collections::HashMap;

use crate::import::types::{DetailRow, ImportRecord, UniqueEntity};

/// Import rows split into one entity per natural key plus one detail row per input row
#[derive(Debug, Clone, Default)]
pub struct Partition {
    /// In first-seen order
    pub entities: Vec<UniqueEntity>,
    pub details: Vec<DetailRow>,
    /// Rows sharing a key but disagreeing on display name
    pub name_mismatches: Vec<String>,
}

/// Collapse rows by natural key.
///
/// The first non-empty display name and phone win; later rows only fill
/// attribute slots that are still empty.
pub fn partition(records: &[ImportRecord]) -> Partition {
    let mut entities: Vec<UniqueEntity> = Vec::new();
    let mut positions: HashMap<&str, usize> = HashMap::new();
    let mut details = Vec::with_capacity(records.len());
    let mut name_mismatches = Vec::new();

    for record in records {
        details.push(DetailRow {
            natural_key: record.natural_key.clone(),
            display_name: record.display_name.clone(),
            category: record.category.clone(),
            reference_date: record.reference_date.clone(),
        });

        let phone = record.phone.clone().filter(|p| !p.trim().is_empty());

        let Some(&position) = positions.get(record.natural_key.as_str()) else {
            positions.insert(record.natural_key.as_str(), entities.len());
            entities.push(UniqueEntity {
                natural_key: record.natural_key.clone(),
                display_name: record.display_name.clone(),
                phone,
                attributes: record.attributes.clone(),
            });
            continue;
        };

        let entity = &mut entities[position];

        if entity.display_name.trim().is_empty() {
            entity.display_name = record.display_name.clone();
        } else if !record.display_name.trim().is_empty()
            && entity.display_name != record.display_name
        {
            name_mismatches.push(format!(
                "{}: display name differs between rows ('{}' vs '{}')",
                record.natural_key, entity.display_name, record.display_name
            ));
        }

        if entity.phone.is_none() {
            entity.phone = phone;
        }

        for (column, value) in &record.attributes {
            if value.trim().is_empty() {
                continue;
            }
            let slot = entity.attributes.entry(column.clone()).or_default();
            if slot.trim().is_empty() {
                *slot = value.clone();
            }
        }
    }

    Partition {
        entities,
        details,
        name_mismatches,
    }
}
