use std::fmt::Display;

///
/// A unique identifier for an object within the simulation tree,
/// indicating its parental inheritance.
///
/// A path is the dot-joined concatenation of the names from the root of
/// the module tree down to the object itself, e.g. `net.router.queue`.
/// Names need not be unique among siblings; lookups return the first match.
///
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectPath {
    data: String,
    last_element_offset: usize,
}

impl ObjectPath {
    ///
    /// Creates a path from its string representation.
    ///
    #[must_use]
    pub fn new(data: impl Into<String>) -> Self {
        let data = data.into();
        let last_element_offset = data.rfind('.').map_or(0, |v| v + 1);
        Self {
            data,
            last_element_offset,
        }
    }

    ///
    /// The local name of the object, the last path element.
    ///
    #[must_use]
    pub fn name(&self) -> &str {
        &self.data[self.last_element_offset..]
    }

    ///
    /// The full path as a string slice.
    ///
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.data
    }

    ///
    /// Whether the object is at the root of the tree.
    ///
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.last_element_offset == 0
    }

    ///
    /// The number of path elements.
    ///
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.split('.').count()
    }

    ///
    /// Whether the path is empty.
    ///
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    ///
    /// The path of the parent entity, or `None` for root entities.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use simkern::prelude::ObjectPath;
    /// let path = ObjectPath::new("net.router.queue");
    /// assert_eq!(path.parent(), Some(ObjectPath::new("net.router")));
    /// assert_eq!(path.parent().unwrap().parent().unwrap().parent(), None);
    /// ```
    ///
    #[must_use]
    pub fn parent(&self) -> Option<ObjectPath> {
        if self.is_root() {
            None
        } else {
            Some(ObjectPath::new(&self.data[..self.last_element_offset - 1]))
        }
    }

    ///
    /// Creates the path of a child entity with the given name.
    ///
    #[must_use]
    pub fn appended(&self, name: impl AsRef<str>) -> ObjectPath {
        let name = name.as_ref();
        if self.data.is_empty() {
            ObjectPath::new(name)
        } else {
            ObjectPath::new(format!("{}.{}", self.data, name))
        }
    }
}

impl Display for ObjectPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.data.fmt(f)
    }
}

impl From<&str> for ObjectPath {
    fn from(value: &str) -> Self {
        ObjectPath::new(value)
    }
}

impl From<String> for ObjectPath {
    fn from(value: String) -> Self {
        ObjectPath::new(value)
    }
}

impl PartialEq<str> for ObjectPath {
    fn eq(&self, other: &str) -> bool {
        self.data == other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_components() {
        let path = ObjectPath::new("net.router.queue");
        assert_eq!(path.name(), "queue");
        assert_eq!(path.as_str(), "net.router.queue");
        assert_eq!(path.len(), 3);
        assert!(!path.is_root());

        let root = ObjectPath::new("net");
        assert_eq!(root.name(), "net");
        assert!(root.is_root());
        assert_eq!(root.parent(), None);
    }

    #[test]
    fn path_appended() {
        let path = ObjectPath::new("net");
        assert_eq!(path.appended("router").as_str(), "net.router");
        assert_eq!(
            path.appended("router").appended("queue"),
            ObjectPath::new("net.router.queue")
        );
    }
}
