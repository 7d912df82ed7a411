use fxhash::FxHashMap;
use std::fmt::Write as _;
use std::io;
use std::sync::RwLock;

use super::ParValue;

///
/// The raw parameter storage of a simulation.
///
/// Parameters are stored under dotted module paths. Path components may be
/// the wildcard `*`, matching any single component, so defaults can be
/// assigned to whole subtrees. Reads resolve the most recently inserted
/// matching branch first.
///
#[derive(Debug)]
pub struct ParMap {
    tree: RwLock<ParTree>,
    memo: RwLock<FxHashMap<String, ParValue>>,
}

#[derive(Debug)]
struct ParTree {
    branches: Vec<ParTreeBranch>,
    pars: FxHashMap<String, String>,
}

#[derive(Debug)]
struct ParTreeBranch {
    matching: ParTreePathMatching,
    node: ParTree,
}

#[derive(Debug)]
enum ParTreePathMatching {
    Any,
    Path(String),
}

impl ParMap {
    ///
    /// Creates new entries from raw input text.
    ///
    /// Each non-empty line holds one `path.key: value` pair; `#` starts
    /// a line comment. Unparsable lines are silently skipped, so partial
    /// input never poisons the map.
    ///
    pub fn build(&self, raw_text: &str) {
        for line in raw_text.lines() {
            let line = line.split('#').next().unwrap_or("");
            let Some((key, value)) = line.split_once(':').or_else(|| line.split_once('=')) else {
                continue;
            };
            let (key, value) = (key.trim(), value.trim());
            if key.is_empty() {
                continue;
            }
            self.insert(key, value.to_string());
        }
    }

    /// The raw value stored under the given key, if any.
    pub fn get(&self, key: &str) -> Option<String> {
        self.tree.read().expect("par tree lock poisoned").get(key)
    }

    /// Inserts a raw value, invalidating any memoized evaluation.
    pub fn insert(&self, key: &str, value: String) {
        self.memo.write().expect("par memo lock poisoned").remove(key);
        self.tree.write().expect("par tree lock poisoned").insert(key, value);
    }

    /// Removes the entry stored under the given key.
    pub fn remove(&self, key: &str) {
        self.memo.write().expect("par memo lock poisoned").remove(key);
        self.tree.write().expect("par tree lock poisoned").remove(key);
    }

    /// All parameter names assigned to the given module path.
    pub fn keys(&self, module: &str) -> Vec<String> {
        let mut keys = Vec::new();
        self.tree
            .read()
            .expect("par tree lock poisoned")
            .keys(module, &mut keys);
        keys.sort();
        keys.dedup();
        keys
    }

    pub(super) fn memoized(&self, key: &str) -> Option<ParValue> {
        self.memo.read().expect("par memo lock poisoned").get(key).cloned()
    }

    pub(super) fn memoize(&self, key: &str, value: ParValue) {
        self.memo
            .write()
            .expect("par memo lock poisoned")
            .insert(key.to_string(), value);
    }

    /// Writes all entries as `path.key: value` lines.
    ///
    /// # Errors
    ///
    /// Forwards errors of the underlying writer.
    pub fn export(&self, writer: &mut impl io::Write) -> io::Result<()> {
        let mut out = String::new();
        self.tree
            .read()
            .expect("par tree lock poisoned")
            .export(&mut out, "");
        writer.write_all(out.as_bytes())
    }
}

impl Default for ParMap {
    fn default() -> Self {
        ParMap {
            tree: RwLock::new(ParTree::new()),
            memo: RwLock::new(FxHashMap::default()),
        }
    }
}

impl ParTree {
    fn new() -> ParTree {
        ParTree {
            branches: Vec::new(),
            pars: FxHashMap::default(),
        }
    }

    fn get(&self, key: &str) -> Option<String> {
        match key.split_once('.') {
            Some((comp, remainder)) => {
                // later insertions win over earlier, wildcarded defaults
                for branch in self
                    .branches
                    .iter()
                    .rev()
                    .filter(|b| b.matching.matches_r(comp))
                {
                    let Some(ret) = branch.node.get(remainder) else {
                        continue;
                    };
                    return Some(ret);
                }
                None
            }
            None => self.pars.get(key).cloned(),
        }
    }

    fn keys(&self, key: &str, result: &mut Vec<String>) {
        if let Some((comp, remainder)) = key.split_once('.') {
            for branch in self.branches.iter().filter(|b| b.matching.matches_r(comp)) {
                branch.node.keys(remainder, result);
            }
        } else {
            for branch in self.branches.iter().filter(|b| b.matching.matches_r(key)) {
                result.extend(branch.node.pars.keys().cloned());
            }
        }
    }

    fn insert(&mut self, key: &str, value: String) {
        if let Some((comp, remainder)) = key.split_once('.') {
            if let Some(branch) = self
                .branches
                .iter_mut()
                .find(|b| b.matching.matches_w(comp))
            {
                branch.node.insert(remainder, value);
            } else {
                let mut node = ParTree::new();
                node.insert(remainder, value);
                let matching = if comp == "*" {
                    ParTreePathMatching::Any
                } else {
                    ParTreePathMatching::Path(comp.to_string())
                };
                self.branches.push(ParTreeBranch { matching, node });
            }
        } else {
            self.pars.insert(key.to_string(), value);
        }
    }

    fn remove(&mut self, key: &str) -> bool {
        match key.split_once('.') {
            Some((comp, rem)) => self
                .branches
                .iter_mut()
                .find(|b| b.matching.matches_w(comp))
                .is_some_and(|b| b.node.remove(rem)),
            None => self.pars.remove(key).is_some(),
        }
    }

    fn export(&self, out: &mut String, path: &str) {
        let mut keys: Vec<_> = self.pars.iter().collect();
        keys.sort();
        for (key, value) in keys {
            if path.is_empty() {
                let _ = writeln!(out, "{key}: {value}");
            } else {
                let _ = writeln!(out, "{path}.{key}: {value}");
            }
        }

        for branch in &self.branches {
            let new_path = if path.is_empty() {
                branch.matching.to_string()
            } else {
                format!("{path}.{}", branch.matching)
            };
            branch.node.export(out, &new_path);
        }
    }
}

impl ParTreePathMatching {
    fn matches_w(&self, key: &str) -> bool {
        match self {
            Self::Any => key == "*",
            Self::Path(ref path) => path == key,
        }
    }

    fn matches_r(&self, key: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Path(ref path) => path == key,
        }
    }
}

impl std::fmt::Display for ParTreePathMatching {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Any => write!(f, "*"),
            Self::Path(path) => write!(f, "{path}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get() {
        let map = ParMap::default();
        map.build("alice.addr: 10.0.0.1\nalice.role: host\n# comment\nbob.role: router");

        assert_eq!(map.get("alice.addr").as_deref(), Some("10.0.0.1"));
        assert_eq!(map.get("alice.role").as_deref(), Some("host"));
        assert_eq!(map.get("bob.role").as_deref(), Some("router"));
        assert_eq!(map.get("bob.addr"), None);
    }

    #[test]
    fn wildcard_matching() {
        let map = ParMap::default();
        map.build("*.role: host\nnet.*.queue: 16\nnet.gateway.role: router");

        assert_eq!(map.get("alice.role").as_deref(), Some("host"));
        assert_eq!(map.get("net.a.queue").as_deref(), Some("16"));
        // explicit entries shadow wildcard defaults
        assert_eq!(map.get("net.gateway.role").as_deref(), Some("router"));
    }

    #[test]
    fn keys_of_module() {
        let map = ParMap::default();
        map.build("alice.a: 1\nalice.b: 2\n*.c: 3");
        assert_eq!(map.keys("alice"), ["a", "b", "c"]);
    }

    #[test]
    fn removal() {
        let map = ParMap::default();
        map.insert("alice.a", "1".to_string());
        map.remove("alice.a");
        assert_eq!(map.get("alice.a"), None);
    }
}
