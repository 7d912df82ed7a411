use std::any::{type_name, Any};
use std::fmt::Debug;

/// A trait that allows a type to be measured in bytes of payload.
pub trait MessageBody {
    /// The length of the message body in bytes.
    fn byte_len(&self) -> usize;
}

// # Primitives

macro_rules! msg_body_primitiv {
    ($t: ty) => {
        impl MessageBody for $t {
            fn byte_len(&self) -> usize {
                std::mem::size_of::<Self>()
            }
        }
    };
}

msg_body_primitiv!(());

msg_body_primitiv!(u8);
msg_body_primitiv!(u16);
msg_body_primitiv!(u32);
msg_body_primitiv!(u64);
msg_body_primitiv!(u128);
msg_body_primitiv!(usize);

msg_body_primitiv!(i8);
msg_body_primitiv!(i16);
msg_body_primitiv!(i32);
msg_body_primitiv!(i64);
msg_body_primitiv!(i128);
msg_body_primitiv!(isize);

msg_body_primitiv!(f64);
msg_body_primitiv!(f32);

msg_body_primitiv!(bool);
msg_body_primitiv!(char);

macro_rules! msg_body_lenable {
    ($t: ty) => {
        impl MessageBody for $t {
            fn byte_len(&self) -> usize {
                self.len()
            }
        }
    };
}

msg_body_lenable!(&'static str);
msg_body_lenable!(String);

impl<T: MessageBody> MessageBody for Box<T> {
    fn byte_len(&self) -> usize {
        use std::ops::Deref;
        self.deref().byte_len()
    }
}

impl<T: MessageBody> MessageBody for Option<T> {
    fn byte_len(&self) -> usize {
        match self {
            Some(ref content) => content.byte_len(),
            None => 0,
        }
    }
}

impl<T: MessageBody> MessageBody for Vec<T> {
    fn byte_len(&self) -> usize {
        self.iter().fold(0, |acc, v| acc + v.byte_len())
    }
}

impl<T: MessageBody, const N: usize> MessageBody for [T; N] {
    fn byte_len(&self) -> usize {
        self.iter().fold(0, |acc, v| acc + v.byte_len())
    }
}

///
/// A type-erased message payload.
///
/// The body remembers how to measure and (if possible) clone the contained
/// value, so messages stay clonable for `dup` without forcing every payload
/// type to be clonable.
///
pub struct Body {
    value: Box<dyn Any>,
    type_name: &'static str,
    len_fn: fn(&dyn Any) -> usize,
    clone_fn: Option<fn(&dyn Any) -> Box<dyn Any>>,
}

impl Body {
    ///
    /// Creates a body from a clonable value.
    ///
    pub fn new<T>(value: T) -> Self
    where
        T: MessageBody + Any + Clone,
    {
        Self {
            value: Box::new(value),
            type_name: type_name::<T>(),
            len_fn: len_impl::<T>,
            clone_fn: Some(clone_impl::<T>),
        }
    }

    ///
    /// Creates a body from a value that cannot be cloned. Messages with
    /// such a body cannot be duplicated.
    ///
    pub fn new_non_clonable<T>(value: T) -> Self
    where
        T: MessageBody + Any,
    {
        Self {
            value: Box::new(value),
            type_name: type_name::<T>(),
            len_fn: len_impl::<T>,
            clone_fn: None,
        }
    }

    /// The current byte length of the contained value.
    #[must_use]
    pub fn length(&self) -> usize {
        (self.len_fn)(&*self.value)
    }

    /// Indicates whether the contained value is of type T.
    #[must_use]
    pub fn is<T: 'static>(&self) -> bool {
        self.value.is::<T>()
    }

    /// The contained value, if it is of type T.
    #[must_use]
    pub fn try_content<T: 'static>(&self) -> Option<&T> {
        self.value.downcast_ref()
    }

    /// The contained value mutably, if it is of type T.
    pub fn try_content_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.value.downcast_mut()
    }

    ///
    /// Consumes the body, extracting the contained value.
    ///
    /// # Errors
    ///
    /// Returns the untouched body if the value is not of type T.
    ///
    pub fn try_cast<T: 'static>(self) -> Result<T, Self> {
        if self.is::<T>() {
            Ok(*self
                .value
                .downcast::<T>()
                .expect("type id checked before downcast"))
        } else {
            Err(self)
        }
    }

    /// Clones the body, if the contained value supports it.
    #[must_use]
    pub fn try_clone(&self) -> Option<Self> {
        let clone_fn = self.clone_fn?;
        Some(Self {
            value: clone_fn(&*self.value),
            type_name: self.type_name,
            len_fn: self.len_fn,
            clone_fn: self.clone_fn,
        })
    }
}

fn len_impl<T: MessageBody + Any>(value: &dyn Any) -> usize {
    value
        .downcast_ref::<T>()
        .expect("length fn bound to body type")
        .byte_len()
}

fn clone_impl<T: MessageBody + Any + Clone>(value: &dyn Any) -> Box<dyn Any> {
    Box::new(
        value
            .downcast_ref::<T>()
            .expect("clone fn bound to body type")
            .clone(),
    )
}

impl Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Body")
            .field("length", &self.length())
            .field("type", &self.type_name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_casting() {
        let body = Body::new(String::from("hello"));
        assert_eq!(body.length(), 5);
        assert!(body.is::<String>());
        assert!(!body.is::<u32>());
        assert_eq!(body.try_content::<String>().unwrap(), "hello");

        let body = body.try_cast::<u32>().unwrap_err();
        assert_eq!(body.try_cast::<String>().unwrap(), "hello");
    }

    #[test]
    fn body_cloning() {
        let body = Body::new(vec![1u8, 2, 3]);
        let clone = body.try_clone().expect("vec is clonable");
        assert_eq!(clone.try_content::<Vec<u8>>().unwrap(), &[1, 2, 3]);

        struct NonClone;
        impl MessageBody for NonClone {
            fn byte_len(&self) -> usize {
                0
            }
        }
        let body = Body::new_non_clonable(NonClone);
        assert!(body.try_clone().is_none());
    }
}
