//! Plugin table merge.
//!
//! Rule: a name appears once, keeps the position of its first appearance,
//! and carries the definition of its last appearance.

use std::collections::HashMap;

use crate::command::{
    CommandDefinition, HttpCommand, PluginTable, PublishSubscribeCommand,
    RequestResponseCommand,
};

/// Ordered name -> definition table.
#[derive(Debug, Clone)]
pub struct CommandTable<D> {
    entries: Vec<(String, D)>,
    index: HashMap<String, usize>,
}

impl<D> Default for CommandTable<D> {
    fn default() -> Self {
        Self { entries: Vec::new(), index: HashMap::new() }
    }
}

impl<D> CommandTable<D> {
    pub fn merge<I, T>(tables: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: IntoIterator<Item = (String, D)>,
    {
        let mut merged = Self::default();
        for table in tables {
            for (name, def) in table {
                merged.upsert(name, def);
            }
        }
        merged
    }

    fn upsert(&mut self, name: String, def: D) {
        if let Some(slot) = self
            .index
            .get(&name)
            .and_then(|&i| self.entries.get_mut(i))
        {
            slot.1 = def;
            return;
        }
        self.index.insert(name.clone(), self.entries.len());
        self.entries.push((name, def));
    }

    pub fn get(&self, name: &str) -> Option<&D> {
        self.index
            .get(name)
            .and_then(|&i| self.entries.get(i))
            .map(|(_, d)| d)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &D)> {
        self.entries.iter().map(|(n, d)| (n.as_str(), d))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The three merged tables, one per command kind. Built once at startup.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    pub http: CommandTable<HttpCommand>,
    pub request_response: CommandTable<RequestResponseCommand>,
    pub publish_subscribe: CommandTable<PublishSubscribeCommand>,
}

impl Registry {
    /// Each kind is merged on its own, so an HTTP `search` and a socket
    /// `search` live side by side.
    pub fn build(plugins: &[PluginTable]) -> Self {
        let http = CommandTable::merge(plugins.iter().map(|table| {
            table.iter().filter_map(|(name, def)| match def {
                CommandDefinition::Http(c) => Some((name.clone(), c.clone())),
                _ => None,
            })
        }));
        let request_response = CommandTable::merge(plugins.iter().map(|table| {
            table.iter().filter_map(|(name, def)| match def {
                CommandDefinition::RequestResponse(c) => Some((name.clone(), c.clone())),
                _ => None,
            })
        }));
        let publish_subscribe = CommandTable::merge(plugins.iter().map(|table| {
            table.iter().filter_map(|(name, def)| match def {
                CommandDefinition::PublishSubscribe(c) => Some((name.clone(), c.clone())),
                _ => None,
            })
        }));

        tracing::info!(
            http = http.len(),
            request_response = request_response.len(),
            publish_subscribe = publish_subscribe.len(),
            "command registry built"
        );

        Self { http, request_response, publish_subscribe }
    }
}
