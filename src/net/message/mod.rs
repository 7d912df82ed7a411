//! Generic network messages.

use fxhash::FxHashMap;
use std::any::Any;
use std::fmt::{Debug, Display};
use std::mem;
use std::ops::{Deref, DerefMut};

mod body;
pub use body::*;

mod header;
pub use header::*;

mod api;
pub use api::*;

///
/// A network message holding an arbitrary payload.
///
/// A message is composed of a [`MessageHeader`] containing generic message
/// parameters, an optional type-erased [`Body`], at most one control-info
/// object and a lazily created, name-keyed tag list.
///
/// Every message carries a process-wide unique id; duplicates created with
/// [`Message::dup`] receive a fresh id but share the originals tree id.
///
#[derive(Debug)]
#[must_use]
pub struct Message {
    pub(crate) header: Box<MessageHeader>,
    pub(crate) content: Option<Body>,
    pub(crate) control: Option<Box<dyn Any>>,
    pub(crate) tags: Option<Box<FxHashMap<String, TagValue>>>,
}

///
/// A value attached to a message through its tag list.
///
#[derive(Debug)]
pub enum TagValue {
    /// An integer value.
    Int(i64),
    /// A floating point value.
    Double(f64),
    /// A string value.
    Str(String),
    /// An arbitrary owned object. Not preserved by [`Message::dup`].
    Object(Box<dyn Any>),
}

impl Message {
    ///
    /// Creates a new empty message with a fresh unique id.
    ///
    pub fn new() -> Self {
        let id = next_message_id();
        register_message_created();
        Self {
            header: Box::new(MessageHeader {
                id,
                tree_id: id,
                ..MessageHeader::default()
            }),
            content: None,
            control: None,
            tags: None,
        }
    }

    /// The unique id of this message.
    #[must_use]
    pub fn id(&self) -> MessageId {
        self.header.id
    }

    /// The id shared by all duplicates in this messages clone tree.
    #[must_use]
    pub fn tree_id(&self) -> MessageId {
        self.header.tree_id
    }

    /// The metadata attached to the message.
    #[inline]
    #[must_use]
    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    /// The metadata attached to the message, mutably.
    #[inline]
    #[must_use]
    pub fn header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }

    /// A short identifier for log output.
    #[must_use]
    pub fn str(&self) -> String {
        format!("#{} kind({}) {} bits", self.header.id, self.header.kind, self.header.bit_len)
    }
}

// # Header fields, builders

impl Message {
    /// **Builder** that sets the message kind field.
    pub fn kind(mut self, kind: MessageKind) -> Self {
        self.header.kind = kind;
        self
    }

    /// **Builder** that sets the scheduling priority field.
    pub fn priority(mut self, priority: i16) -> Self {
        self.header.priority = priority;
        self
    }

    /// **Builder** that sets the user timestamp field.
    pub fn timestamp(mut self, timestamp: impl Into<crate::time::SimTime>) -> Self {
        self.header.timestamp = timestamp.into();
        self
    }

    /// **Builder** that sets the payload length in bits, overriding the
    /// length derived from the content.
    pub fn bit_len(mut self, bit_len: u64) -> Self {
        self.header.bit_len = bit_len;
        self
    }

    /// **Builder** that sets the partition id field.
    pub fn partition(mut self, partition_id: u16) -> Self {
        self.header.partition_id = partition_id;
        self
    }

    /// **Builder** that marks this message as an update to the in-flight
    /// transmission of the referenced message.
    pub fn update_of(mut self, original: MessageId) -> Self {
        self.header.update_of = Some(original);
        self
    }
}

// # Content accessing

impl Message {
    /// Sets the content of the message, deriving the bit length
    /// from the bodys byte length.
    pub fn set_content<T>(&mut self, value: T)
    where
        T: MessageBody + Any + Clone,
    {
        let body = Body::new(value);
        self.header.bit_len = body.length() as u64 * 8;
        self.content = Some(body);
    }

    /// **Builder** that sets the content of the message.
    pub fn content<T>(mut self, value: T) -> Self
    where
        T: MessageBody + Any + Clone,
    {
        self.set_content(value);
        self
    }

    /// Tries to return the content by reference, cast to the type T.
    #[must_use]
    pub fn try_content<T: 'static>(&self) -> Option<&T> {
        self.content.as_ref().and_then(Body::try_content::<T>)
    }

    /// Tries to return the content by mutable reference, cast to the type T.
    pub fn try_content_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.content.as_mut().and_then(Body::try_content_mut::<T>)
    }

    /// Indicates whether a cast of the content to type T can succeed.
    #[must_use]
    pub fn can_cast<T: 'static>(&self) -> bool {
        self.content.as_ref().is_some_and(Body::is::<T>)
    }

    ///
    /// Consumes the message, extracting the typed content and the header.
    ///
    /// # Errors
    ///
    /// Returns the untouched message if there is no content, or the
    /// content is not of type T.
    ///
    pub fn try_cast<T: 'static>(mut self) -> Result<(T, MessageHeader), Self> {
        match self.content.take() {
            Some(body) => match body.try_cast::<T>() {
                Ok(value) => {
                    let header = mem::take(&mut self.header);
                    Ok((value, *header))
                }
                Err(body) => {
                    self.content = Some(body);
                    Err(self)
                }
            },
            None => Err(self),
        }
    }

    ///
    /// Consumes the message, extracting the typed content and the header.
    ///
    /// # Panics
    ///
    /// Panics if the cast fails.
    ///
    #[must_use]
    pub fn cast<T: 'static>(self) -> (T, MessageHeader) {
        self.try_cast()
            .unwrap_or_else(|this| panic!("could not cast content of message [{}]", this.str()))
    }
}

// # Control info

impl Message {
    /// Attaches a control-info object, replacing (and dropping) any
    /// previous one. The message owns the object and drops it on delete.
    pub fn set_control_info(&mut self, value: Box<dyn Any>) {
        self.control = Some(value);
    }

    /// **Builder** that attaches a control-info object.
    pub fn with_control_info(mut self, value: Box<dyn Any>) -> Self {
        self.set_control_info(value);
        self
    }

    /// The attached control-info, if it is of type T.
    #[must_use]
    pub fn control_info<T: 'static>(&self) -> Option<&T> {
        self.control.as_ref().and_then(|c| c.downcast_ref())
    }

    /// Detaches and returns the control-info object.
    pub fn take_control_info(&mut self) -> Option<Box<dyn Any>> {
        self.control.take()
    }
}

// # Tag list

impl Message {
    /// Attaches a named tag, creating the tag list on first use.
    pub fn add_tag(&mut self, name: impl Into<String>, value: TagValue) {
        self.tags
            .get_or_insert_with(Box::default)
            .insert(name.into(), value);
    }

    /// The tag stored under the given name, if any.
    #[must_use]
    pub fn tag(&self, name: &str) -> Option<&TagValue> {
        self.tags.as_ref().and_then(|tags| tags.get(name))
    }
}

// # Duplication

impl Message {
    ///
    /// Tries to create a semantic copy of this message.
    ///
    /// The copy receives a fresh id but inherits the tree id and creation
    /// time. Control info is *not* cloned; object tags are not preserved.
    /// Returns `None` if the body is not clonable.
    ///
    #[must_use]
    pub fn try_dup(&self) -> Option<Self> {
        let content = match &self.content {
            Some(body) => Some(body.try_clone()?),
            None => None,
        };
        register_message_created();
        Some(Self {
            header: Box::new(self.header.dup()),
            content,
            control: None,
            tags: self.tags.as_ref().map(|tags| {
                Box::new(
                    tags.iter()
                        .filter_map(|(k, v)| {
                            let v = match v {
                                TagValue::Int(v) => TagValue::Int(*v),
                                TagValue::Double(v) => TagValue::Double(*v),
                                TagValue::Str(v) => TagValue::Str(v.clone()),
                                TagValue::Object(_) => return None,
                            };
                            Some((k.clone(), v))
                        })
                        .collect(),
                )
            }),
        })
    }

    ///
    /// Creates a semantic copy of this message, see [`Message::try_dup`].
    ///
    /// # Panics
    ///
    /// Panics if the body is not clonable.
    ///
    pub fn dup(&self) -> Self {
        self.try_dup()
            .unwrap_or_else(|| panic!("cannot duplicate message [{}]: body not clonable", self.str()))
    }
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for Message {
    type Target = MessageHeader;
    fn deref(&self) -> &Self::Target {
        &self.header
    }
}

impl DerefMut for Message {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.header
    }
}

impl Drop for Message {
    fn drop(&mut self) {
        register_message_dropped();
    }
}

impl Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Message {{ {} {:?} }}", self.str(), self.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn unique_ids() {
        let a = Message::new();
        let b = Message::new();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.tree_id(), a.id());
    }

    #[test]
    #[serial]
    fn dup_semantics() {
        let msg = Message::new()
            .kind(4)
            .content(String::from("payload"))
            .with_control_info(Box::new(42u32));

        let dup = msg.dup();
        assert_ne!(dup.id(), msg.id());
        assert_eq!(dup.tree_id(), msg.tree_id());
        assert_eq!(dup.header().creation_time, msg.header().creation_time);
        assert_eq!(dup.try_content::<String>().unwrap(), "payload");
        // control info stays with the original
        assert_eq!(msg.control_info::<u32>(), Some(&42));
        assert!(dup.control_info::<u32>().is_none());
    }

    #[test]
    #[serial]
    fn content_casting() {
        let msg = Message::new().content(String::from("hi"));
        assert!(msg.can_cast::<String>());
        assert_eq!(msg.header().bit_len, 16);

        let msg = msg.try_cast::<u32>().unwrap_err();
        let (value, header) = msg.cast::<String>();
        assert_eq!(value, "hi");
        assert_ne!(header.id(), 0);
    }

    #[test]
    #[serial]
    fn tag_list() {
        let mut msg = Message::new();
        assert!(msg.tag("hops").is_none());
        msg.add_tag("hops", TagValue::Int(3));
        msg.add_tag("flow", TagValue::Str("a".into()));
        msg.add_tag("obj", TagValue::Object(Box::new(1u8)));

        assert!(matches!(msg.tag("hops"), Some(TagValue::Int(3))));

        let dup = msg.dup();
        assert!(matches!(dup.tag("hops"), Some(TagValue::Int(3))));
        assert!(dup.tag("obj").is_none());
    }

    #[test]
    #[serial]
    fn live_counter() {
        let (_, live_before) = message_count();
        let msg = Message::new();
        let dup = msg.dup();
        let (_, live) = message_count();
        assert_eq!(live, live_before + 2);
        drop(msg);
        drop(dup);
        let (_, live) = message_count();
        assert_eq!(live, live_before);
    }
}
