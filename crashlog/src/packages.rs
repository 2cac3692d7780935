use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crashlog_symbols::{OverrideMap, PackageProvider, SymbolMaps};
use log::warn;
use serde_derive::Deserialize;

use crate::error::CliError;

/// A package database loaded from a JSON file:
/// `{ "/path/to/binary": { "identifier": "com.x.y", "install_date": "..." } }`.
///
/// Stands in for the device's package manager, which knows which package
/// installed which file.
pub struct JsonPackageDb {
    entries: HashMap<String, PackageEntry>,
}

#[derive(Debug, Deserialize)]
struct PackageEntry {
    identifier: String,
    #[serde(default)]
    install_date: Option<String>,
}

impl JsonPackageDb {
    pub fn from_file(path: &Path) -> Result<Self, CliError> {
        let data = fs::read(path)
            .map_err(|err| CliError::FileRead(path.display().to_string(), err))?;
        let entries = serde_json::from_slice(&data)
            .map_err(|err| CliError::Json(path.display().to_string(), err))?;
        Ok(Self { entries })
    }
}

impl PackageProvider for JsonPackageDb {
    fn package_identifier(&self, path: &Path) -> Option<String> {
        self.entries
            .get(path.to_str()?)
            .map(|entry| entry.identifier.clone())
    }

    fn install_date(&self, path: &Path) -> Option<String> {
        self.entries.get(path.to_str()?)?.install_date.clone()
    }
}

/// Loads override symbol maps from a JSON file:
/// `{ "<image path or uuid>": { "0x1000": "symbolName", ... } }`.
/// Addresses may be hex (`0x` prefix) or decimal.
pub fn load_symbol_maps(path: &Path) -> Result<SymbolMaps, CliError> {
    let data =
        fs::read(path).map_err(|err| CliError::FileRead(path.display().to_string(), err))?;
    symbol_maps_from_slice(&data).map_err(|err| CliError::Json(path.display().to_string(), err))
}

fn symbol_maps_from_slice(data: &[u8]) -> Result<SymbolMaps, serde_json::Error> {
    let raw: HashMap<String, HashMap<String, String>> = serde_json::from_slice(data)?;
    let mut maps = SymbolMaps::new();
    for (image, entries) in raw {
        let mut map = OverrideMap::new();
        for (address, name) in entries {
            match parse_address(&address) {
                Some(address) => {
                    map.insert(address, name);
                }
                None => warn!("symbol map for {image}: skipping bad address {address:?}"),
            }
        }
        maps.insert(image, map);
    }
    Ok(maps)
}

fn parse_address(token: &str) -> Option<u64> {
    match token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => token.parse().ok(),
    }
}
