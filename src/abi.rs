//! Runtime type dictionary loaded from the node (or from bundled
//! contract ABIs) at session start. The state-history protocol sends
//! its schema as the first websocket frame; every subsequent frame is
//! decoded against it.

use crate::error::CodecError;
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Deserialize)]
pub struct AbiTypeDef {
    pub new_type_name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AbiField {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AbiStruct {
    pub name: String,
    #[serde(default)]
    pub base: String,
    #[serde(default)]
    pub fields: Vec<AbiField>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AbiVariant {
    pub name: String,
    pub types: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AbiTable {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AbiAction {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

/// The ABI document as it appears on the wire.
#[derive(Debug, Default, Deserialize)]
pub struct AbiDef {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub types: Vec<AbiTypeDef>,
    #[serde(default)]
    pub structs: Vec<AbiStruct>,
    #[serde(default)]
    pub variants: Vec<AbiVariant>,
    #[serde(default)]
    pub tables: Vec<AbiTable>,
    #[serde(default)]
    pub actions: Vec<AbiAction>,
}

/// An ABI with its lookup maps built. Immutable for the lifetime of a
/// session; dropped on disconnect.
#[derive(Debug)]
pub struct Abi {
    pub version: String,
    aliases: HashMap<String, String>,
    structs: HashMap<String, AbiStruct>,
    variants: HashMap<String, AbiVariant>,
    tables: HashMap<String, String>,
    actions: HashMap<String, String>,
}

impl Abi {
    pub fn parse(text: &str) -> Result<Self, CodecError> {
        let def: AbiDef = serde_json::from_str(text)
            .map_err(|e| CodecError::invalid("abi document", e))?;
        Ok(Self::from_def(def))
    }

    pub fn from_def(def: AbiDef) -> Self {
        Self {
            version: def.version,
            aliases: def
                .types
                .into_iter()
                .map(|t| (t.new_type_name, t.type_name))
                .collect(),
            structs: def
                .structs
                .into_iter()
                .map(|s| (s.name.clone(), s))
                .collect(),
            variants: def
                .variants
                .into_iter()
                .map(|v| (v.name.clone(), v))
                .collect(),
            tables: def
                .tables
                .into_iter()
                .map(|t| (t.name, t.type_name))
                .collect(),
            actions: def
                .actions
                .into_iter()
                .map(|a| (a.name, a.type_name))
                .collect(),
        }
    }

    /// Follow `types` aliases to the underlying type name. Alias chains
    /// in real ABIs are one or two deep; the walk is bounded to reject
    /// a malicious cycle.
    pub fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        let mut current = name;
        for _ in 0..8 {
            match self.aliases.get(current) {
                Some(next) => current = next,
                None => return current,
            }
        }
        current
    }

    pub fn get_struct(&self, name: &str) -> Option<&AbiStruct> {
        self.structs.get(name)
    }

    pub fn get_variant(&self, name: &str) -> Option<&AbiVariant> {
        self.variants.get(name)
    }

    /// Row type for a contract table, e.g. `global`.
    pub fn table_row_type(&self, table: &str) -> Option<&str> {
        self.tables.get(table).map(String::as_str)
    }

    /// Payload type for a contract action, e.g. `transfer`.
    pub fn action_type(&self, action: &str) -> Option<&str> {
        self.actions.get(action).map(String::as_str)
    }

    pub fn has_type(&self, name: &str) -> bool {
        let resolved = self.resolve(name);
        self.structs.contains_key(resolved) || self.variants.contains_key(resolved)
    }
}

/// Contract ABIs bundled with the deployment, keyed by account. The
/// node schema only describes transport types; contract-row payloads
/// (the `global` table) and action data (`eosio.token::transfer`)
/// decode against these.
#[derive(Debug, Default)]
pub struct ContractAbis {
    map: HashMap<String, Abi>,
}

impl ContractAbis {
    pub fn load(paths: &HashMap<String, std::path::PathBuf>) -> anyhow::Result<Self> {
        let mut map = HashMap::new();
        for (account, path) in paths {
            let text = std::fs::read_to_string(path).map_err(|e| {
                anyhow::anyhow!("reading abi for {account} from {}: {e}", path.display())
            })?;
            let abi = Abi::parse(&text)
                .map_err(|e| anyhow::anyhow!("parsing abi for {account}: {e}"))?;
            map.insert(account.clone(), abi);
        }
        Ok(Self { map })
    }

    pub fn insert(&mut self, account: impl Into<String>, abi: Abi) {
        self.map.insert(account.into(), abi);
    }

    pub fn get(&self, account: &str) -> Option<&Abi> {
        self.map.get(account)
    }
}
