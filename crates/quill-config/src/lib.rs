// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod fields;
pub mod loader;
pub mod overlay;
pub mod paths;
pub mod schema;
pub mod store;

pub use fields::{field_registry, Constraint, FieldSpec, FieldType, FieldValue};
pub use loader::load_config_file;
pub use overlay::OverlayStore;
pub use paths::DataPaths;
pub use schema::ServiceMode;
pub use store::{FieldInfo, SettingsError, SettingsStore};
