//! Generator configuration.
//!
//! A [`GeneratorConfig`] describes where one generator keeps its sequence rows
//! (the [`TableLayout`] and [`Dialect`]), how the first row for a new name is
//! seeded, and how the generator relates to others in a [`Registry`] through
//! `fallback` and `refer_to`.
//!
//! With the `serde` feature the config deserializes from a flat map, with the
//! layout fields inlined:
//!
//! ```json
//! { "dialect": "postgres", "schema": "ids", "table": "seq", "fetch_size": 50 }
//! ```
//!
//! [`Registry`]: crate::Registry

use crate::{dialect::Dialect, error::ConfigError};

/// Default table holding one row per logical name.
pub const DEFAULT_TABLE: &str = "sequence_table";

/// Default pause before retrying after losing a first-row insert race.
pub const DEFAULT_WAIT_MILLIS_ON_CREATE_RACE: u64 = 50;

/// Default number of units fetched per round trip for a freshly created row.
pub const DEFAULT_FETCH_SIZE: u32 = 100;

/// Physical location of the sequence table: schema, table and column names.
///
/// Every name is spliced into SQL text, so each must be a plain identifier
/// (`[A-Za-z_][A-Za-z0-9_]*`). [`TableLayout::validate`] enforces this.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TableLayout {
    pub schema: Option<String>,
    pub table: String,
    pub name_column: String,
    pub prev_value_column: String,
    pub step_size_column: String,
    pub fetch_size_column: String,
}

impl Default for TableLayout {
    fn default() -> Self {
        Self {
            schema: None,
            table: DEFAULT_TABLE.to_owned(),
            name_column: "name".to_owned(),
            prev_value_column: "prev_value".to_owned(),
            step_size_column: "step_size".to_owned(),
            fetch_size_column: "fetch_size".to_owned(),
        }
    }
}

impl TableLayout {
    /// The table name as it appears in statements, schema-qualified when a
    /// schema is set.
    pub fn qualified_table(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{schema}.{}", self.table),
            None => self.table.clone(),
        }
    }

    /// Checks that every configured name is a plain SQL identifier.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidIdentifier`] naming the first offending
    /// field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(schema) = &self.schema {
            check_identifier("schema", schema)?;
        }
        check_identifier("table", &self.table)?;
        check_identifier("name_column", &self.name_column)?;
        check_identifier("prev_value_column", &self.prev_value_column)?;
        check_identifier("step_size_column", &self.step_size_column)?;
        check_identifier("fetch_size_column", &self.fetch_size_column)
    }
}

fn check_identifier(field: &'static str, value: &str) -> Result<(), ConfigError> {
    let mut chars = value.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidIdentifier {
            field,
            value: value.to_owned(),
        })
    }
}

/// Configuration of one generator.
///
/// `initial_value`, `step_size` and `fetch_size` seed the row created the
/// first time a name is used. Once the row exists, its stored step and fetch
/// sizes are authoritative and these fields are ignored for that name.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct GeneratorConfig {
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub layout: TableLayout,
    pub dialect: Dialect,
    pub wait_millis_on_create_race: u64,
    /// Serve names that have no configuration of their own.
    pub fallback: bool,
    /// Delegate to another generator, reusing its table and datasource.
    pub refer_to: Option<String>,
    /// The registered datasource to open connections from. Defaults to the
    /// generator's own name.
    pub datasource: Option<String>,
    pub initial_value: i64,
    pub step_size: u32,
    pub fetch_size: u32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            layout: TableLayout::default(),
            dialect: Dialect::default(),
            wait_millis_on_create_race: DEFAULT_WAIT_MILLIS_ON_CREATE_RACE,
            fallback: false,
            refer_to: None,
            datasource: None,
            initial_value: 0,
            step_size: 1,
            fetch_size: DEFAULT_FETCH_SIZE,
        }
    }
}

impl GeneratorConfig {
    /// A config for `dialect` with every other field at its default.
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            ..Self::default()
        }
    }

    /// A config that only delegates to the generator named `target`.
    pub fn refer_to(target: impl Into<String>) -> Self {
        Self {
            refer_to: Some(target.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_layout(mut self, layout: TableLayout) -> Self {
        self.layout = layout;
        self
    }

    #[must_use]
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.layout.table = table.into();
        self
    }

    #[must_use]
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.layout.schema = Some(schema.into());
        self
    }

    #[must_use]
    pub fn with_datasource(mut self, datasource: impl Into<String>) -> Self {
        self.datasource = Some(datasource.into());
        self
    }

    #[must_use]
    pub fn with_fallback(mut self, fallback: bool) -> Self {
        self.fallback = fallback;
        self
    }

    #[must_use]
    pub fn with_initial_value(mut self, initial_value: i64) -> Self {
        self.initial_value = initial_value;
        self
    }

    #[must_use]
    pub fn with_step_size(mut self, step_size: u32) -> Self {
        self.step_size = step_size;
        self
    }

    #[must_use]
    pub fn with_fetch_size(mut self, fetch_size: u32) -> Self {
        self.fetch_size = fetch_size;
        self
    }

    #[must_use]
    pub fn with_wait_millis_on_create_race(mut self, millis: u64) -> Self {
        self.wait_millis_on_create_race = millis;
        self
    }

    /// Validates the parts of the config a generator owns.
    ///
    /// Referring configs (`refer_to` set) own nothing and always pass.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidSize`] for a zero step or fetch size and
    /// [`ConfigError::InvalidIdentifier`] for a malformed layout.
    pub fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.refer_to.is_some() {
            return Ok(());
        }
        if self.step_size == 0 {
            return Err(ConfigError::InvalidSize {
                name: name.to_owned(),
                field: "step_size",
            });
        }
        if self.fetch_size == 0 {
            return Err(ConfigError::InvalidSize {
                name: name.to_owned(),
                field: "fetch_size",
            });
        }
        self.layout.validate()
    }
}
