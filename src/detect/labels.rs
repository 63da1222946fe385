use anyhow::{anyhow, Context, Result};
use std::collections::BTreeMap;
use std::path::Path;

/// Class index to display name mapping, loaded from a `"<index> <name>"` file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelMap {
    names: BTreeMap<usize, String>,
}

impl LabelMap {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read labels file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid labels file {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let mut names = BTreeMap::new();
        for (line_no, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.splitn(2, char::is_whitespace);
            let index = parts.next().unwrap_or_default();
            let name = parts.next().map(str::trim).unwrap_or_default();
            let index: usize = index
                .parse()
                .map_err(|_| anyhow!("line {}: '{}' is not a class index", line_no + 1, index))?;
            if name.is_empty() {
                return Err(anyhow!("line {}: missing label for class {}", line_no + 1, index));
            }
            names.insert(index, name.to_string());
        }
        Ok(Self { names })
    }

    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (usize, S)>,
        S: Into<String>,
    {
        Self {
            names: pairs.into_iter().map(|(i, s)| (i, s.into())).collect(),
        }
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.names.get(&index).map(String::as_str)
    }

    /// Display name for `index`, falling back to `class_<index>`.
    pub fn name_or_default(&self, index: usize) -> String {
        self.get(index)
            .map(str::to_string)
            .unwrap_or_else(|| format!("class_{}", index))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
