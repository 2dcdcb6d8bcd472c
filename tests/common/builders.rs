//! Test data builders for conf files

use std::fmt::Write;

/// Builder for one conf entry
pub struct ConfEntryBuilder {
    name: String,
    fields: Vec<(&'static str, String)>,
}

impl ConfEntryBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fields: vec![
                ("factory", format!("/test/{}", name)),
                ("source", format!("{}.lua", name)),
                ("function", name.to_string()),
                ("input_types", "float32".to_string()),
                ("output_types", "float32".to_string()),
            ],
        }
    }

    pub fn set(mut self, key: &'static str, value: &str) -> Self {
        self.fields.retain(|(k, _)| *k != key);
        self.fields.push((key, value.to_string()));
        self
    }

    pub fn without(mut self, key: &str) -> Self {
        self.fields.retain(|(k, _)| *k != key);
        self
    }

    pub fn to_toml(&self) -> String {
        let mut out = format!("[{}]\n", self.name);
        for (key, value) in &self.fields {
            writeln!(out, "{} = {:?}", key, value).unwrap();
        }
        out
    }
}

/// Concatenate entries into one conf file body
pub fn conf_file(entries: &[ConfEntryBuilder]) -> String {
    entries
        .iter()
        .map(ConfEntryBuilder::to_toml)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_builder() {
        let toml = ConfEntryBuilder::new("gain")
            .set("input_types", "int16 int16")
            .without("function")
            .to_toml();

        assert!(toml.starts_with("[gain]\n"));
        assert!(toml.contains("input_types = \"int16 int16\""));
        assert!(!toml.contains("function"));
    }
}
