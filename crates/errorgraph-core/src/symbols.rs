use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UsageSite {
    pub file_path: String,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSymbol {
    pub name: String,
    pub file_path: String,
    pub line_start: u32,
    pub line_end: u32,
    #[serde(default)]
    pub parameters: Vec<String>,
    /// Names of functions called from the body, unresolved.
    #[serde(default)]
    pub calls: Vec<String>,
    #[serde(default)]
    pub usages: Vec<UsageSite>,
    /// Owning class when the function is a method.
    #[serde(default)]
    pub class_name: Option<String>,
    #[serde(default)]
    pub complexity: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassSymbol {
    pub name: String,
    pub file_path: String,
    pub line_start: u32,
    pub line_end: u32,
    #[serde(default)]
    pub base_classes: Vec<String>,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub usages: Vec<UsageSite>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSymbol {
    pub name: String,
    pub file_path: String,
}

impl ModuleSymbol {
    pub fn from_path(file_path: &str) -> Self {
        let name = file_path
            .trim_end_matches(".py")
            .trim_start_matches("./")
            .replace(['/', '\\'], ".");
        Self {
            name,
            file_path: file_path.to_string(),
        }
    }
}

/// Symbol data exposed by the parsing layer.
#[async_trait]
pub trait SymbolProvider: Send + Sync {
    async fn functions(&self) -> Result<Vec<FunctionSymbol>>;

    async fn classes(&self) -> Result<Vec<ClassSymbol>>;

    /// Defaults to one module per file that declares a function or class.
    async fn modules(&self) -> Result<Vec<ModuleSymbol>> {
        let mut files = BTreeSet::new();
        for f in self.functions().await? {
            files.insert(f.file_path);
        }
        for c in self.classes().await? {
            files.insert(c.file_path);
        }
        Ok(files.iter().map(|f| ModuleSymbol::from_path(f)).collect())
    }
}

/// In-memory symbol table, typically deserialized from the parser's JSON export.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StaticSymbols {
    #[serde(default)]
    pub functions: Vec<FunctionSymbol>,
    #[serde(default)]
    pub classes: Vec<ClassSymbol>,
    #[serde(default)]
    pub modules: Vec<ModuleSymbol>,
}

impl StaticSymbols {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[async_trait]
impl SymbolProvider for StaticSymbols {
    async fn functions(&self) -> Result<Vec<FunctionSymbol>> {
        Ok(self.functions.clone())
    }

    async fn classes(&self) -> Result<Vec<ClassSymbol>> {
        Ok(self.classes.clone())
    }

    async fn modules(&self) -> Result<Vec<ModuleSymbol>> {
        if !self.modules.is_empty() {
            return Ok(self.modules.clone());
        }
        let mut files = BTreeSet::new();
        files.extend(self.functions.iter().map(|f| f.file_path.clone()));
        files.extend(self.classes.iter().map(|c| c.file_path.clone()));
        Ok(files.iter().map(|f| ModuleSymbol::from_path(f)).collect())
    }
}
