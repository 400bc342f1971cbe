//! Static mapping from short store codes (`dc`, `towson`, ...) to the media
//! API's location identifiers.

use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationDirectory {
    locations: BTreeMap<String, String>,
}

impl LocationDirectory {
    /// Parse `store=location` pairs separated by commas, e.g.
    /// `dc=1234567890,towson=9876543210`.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut locations = BTreeMap::new();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (store, location) = parse_entry(entry)?;
            locations.insert(store, location);
        }
        Ok(Self { locations })
    }

    /// Add or replace a single `store=location` pair.
    pub fn insert_entry(&mut self, entry: &str) -> Result<(), String> {
        let (store, location) = parse_entry(entry)?;
        self.locations.insert(store, location);
        Ok(())
    }

    pub fn resolve(&self, store_id: &str) -> Option<&str> {
        self.locations.get(store_id).map(String::as_str)
    }

    pub fn stores(&self) -> impl Iterator<Item = &str> {
        self.locations.keys().map(String::as_str)
    }
}

fn parse_entry(entry: &str) -> Result<(String, String), String> {
    let (store, location) = entry
        .split_once('=')
        .ok_or_else(|| format!("location entry `{}` is not store=location", entry))?;
    let (store, location) = (store.trim(), location.trim());
    if store.is_empty() || location.is_empty() {
        return Err(format!("location entry `{}` has an empty side", entry));
    }
    Ok((store.to_string(), location.to_string()))
}
