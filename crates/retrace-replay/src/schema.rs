//! Per-call replay schemas.
//!
//! Payload values are self-describing, so the dispatcher needs no field
//! layout to remap handles and addresses. A schema only says what a call
//! does to object lifetimes, which argument carries its dispatch handle,
//! which handle arguments must not be null, and whether a result code
//! trails the arguments.

use indexmap::IndexMap;
use retrace_core::{CallId, HandleCategory};

/// What a call does, as far as the mapping tables are concerned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallKind {
    /// No object lifetime effects.
    Invoke,
    /// Creates one or more objects.
    Create {
        /// Category of the created objects.
        category: HandleCategory,
        /// Argument holding the created handle or handle array.
        output_arg: usize,
        /// Argument holding the object the new ones belong to. Falls back
        /// to the dispatch argument when `None`.
        parent_arg: Option<usize>,
    },
    /// Destroys one object.
    Destroy {
        /// Category of the destroyed object.
        category: HandleCategory,
        /// Argument holding the destroyed handle.
        handle_arg: usize,
    },
    /// Returns the GPU virtual address of an allocation.
    QueryAddress {
        /// Argument holding the allocation's handle.
        owner_arg: usize,
        /// Argument holding the allocation's size in bytes.
        size_arg: usize,
        /// Argument holding the address observed at capture time.
        output_arg: usize,
    },
}

/// Replay description of one entry point.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallSchema {
    /// Entry point name, for diagnostics.
    pub name: &'static str,
    /// Lifetime effect.
    pub kind: CallKind,
    /// Argument holding the dispatchable handle the call is made on.
    pub dispatch_arg: Option<usize>,
    /// Whether the payload ends with the call's result code.
    pub returns_code: bool,
    /// Bit `i` set: argument `i` holds handles that must not be null. The
    /// dispatch argument, a destroyed handle and an address owner are
    /// always required.
    pub required_args: u32,
}

impl CallSchema {
    /// A plain call.
    pub const fn invoke(name: &'static str) -> Self {
        Self {
            name,
            kind: CallKind::Invoke,
            dispatch_arg: None,
            returns_code: false,
            required_args: 0,
        }
    }

    /// A call creating objects of `category` into `output_arg`.
    pub const fn create(name: &'static str, category: HandleCategory, output_arg: usize) -> Self {
        Self {
            name,
            kind: CallKind::Create {
                category,
                output_arg,
                parent_arg: None,
            },
            dispatch_arg: None,
            returns_code: false,
            required_args: 0,
        }
    }

    /// A call destroying the object of `category` in `handle_arg`.
    pub const fn destroy(name: &'static str, category: HandleCategory, handle_arg: usize) -> Self {
        Self {
            name,
            kind: CallKind::Destroy {
                category,
                handle_arg,
            },
            dispatch_arg: None,
            returns_code: false,
            required_args: 0,
        }
    }

    /// A call returning the device address of the allocation in `owner_arg`.
    pub const fn query_address(
        name: &'static str,
        owner_arg: usize,
        size_arg: usize,
        output_arg: usize,
    ) -> Self {
        Self {
            name,
            kind: CallKind::QueryAddress {
                owner_arg,
                size_arg,
                output_arg,
            },
            dispatch_arg: None,
            returns_code: false,
            required_args: 0,
        }
    }

    /// Set the dispatch argument.
    pub const fn dispatch(mut self, arg: usize) -> Self {
        self.dispatch_arg = Some(arg);
        self
    }

    /// Set the parent argument of a [`CallKind::Create`] schema.
    pub const fn parent(mut self, arg: usize) -> Self {
        if let CallKind::Create {
            category,
            output_arg,
            ..
        } = self.kind
        {
            self.kind = CallKind::Create {
                category,
                output_arg,
                parent_arg: Some(arg),
            };
        }
        self
    }

    /// Mark the handles in argument `arg` as required. Arguments past the
    /// 32nd cannot be marked.
    pub const fn require(mut self, arg: usize) -> Self {
        if arg < u32::BITS as usize {
            self.required_args |= 1 << arg;
        }
        self
    }

    /// Whether a null handle in argument `arg` is an error.
    pub fn is_required(&self, arg: usize) -> bool {
        let implied = match self.kind {
            CallKind::Destroy { handle_arg, .. } => Some(handle_arg),
            CallKind::QueryAddress { owner_arg, .. } => Some(owner_arg),
            CallKind::Invoke | CallKind::Create { .. } => None,
        };
        self.dispatch_arg == Some(arg)
            || implied == Some(arg)
            || (arg < u32::BITS as usize && self.required_args & (1 << arg) != 0)
    }

    /// Mark the payload as ending with a result code.
    pub const fn returns_code(mut self) -> Self {
        self.returns_code = true;
        self
    }

    /// Arguments written by the call rather than read by it.
    pub(crate) fn output_arg(&self) -> Option<usize> {
        match self.kind {
            CallKind::Create { output_arg, .. } | CallKind::QueryAddress { output_arg, .. } => {
                Some(output_arg)
            }
            CallKind::Invoke | CallKind::Destroy { .. } => None,
        }
    }
}

/// Schemas keyed by [`CallId`].
#[derive(Clone, Debug, Default)]
pub struct SchemaRegistry {
    schemas: IndexMap<CallId, CallSchema>,
}

impl SchemaRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema, returning the one it replaced.
    pub fn register(&mut self, call_id: CallId, schema: CallSchema) -> Option<CallSchema> {
        self.schemas.insert(call_id, schema)
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, call_id: CallId, schema: CallSchema) -> Self {
        self.register(call_id, schema);
        self
    }

    /// The schema for `call_id`.
    pub fn get(&self, call_id: CallId) -> Option<&CallSchema> {
        self.schemas.get(&call_id)
    }

    /// Number of registered schemas.
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    /// Whether no schema is registered.
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_compose() {
        let s = CallSchema::create("vkAllocateCommandBuffers", HandleCategory::CommandBuffer, 2)
            .dispatch(0)
            .parent(1)
            .returns_code();
        assert_eq!(s.dispatch_arg, Some(0));
        assert!(s.returns_code);
        assert_eq!(
            s.kind,
            CallKind::Create {
                category: HandleCategory::CommandBuffer,
                output_arg: 2,
                parent_arg: Some(1)
            }
        );
        assert_eq!(s.output_arg(), Some(2));
    }

    #[test]
    fn parent_ignored_for_non_create() {
        let s = CallSchema::invoke("vkCmdDraw").parent(3);
        assert_eq!(s.kind, CallKind::Invoke);
        assert_eq!(s.output_arg(), None);
    }

    #[test]
    fn required_arguments() {
        let s = CallSchema::invoke("vkQueueSubmit").dispatch(0).require(2);
        assert!(s.is_required(0));
        assert!(!s.is_required(1));
        assert!(s.is_required(2));
        assert!(!s.is_required(40));

        let d = CallSchema::destroy("vkDestroyBuffer", HandleCategory::Buffer, 1);
        assert!(d.is_required(1));
        let q = CallSchema::query_address("vkGetBufferDeviceAddress", 1, 2, 3);
        assert!(q.is_required(1));
        assert!(!q.is_required(3));
        assert_eq!(CallSchema::invoke("x").require(64).required_args, 0);
    }

    #[test]
    fn register_replaces() {
        let mut r = SchemaRegistry::new();
        assert!(r.register(CallId(1), CallSchema::invoke("a")).is_none());
        let old = r.register(CallId(1), CallSchema::invoke("b")).unwrap();
        assert_eq!(old.name, "a");
        assert_eq!(r.get(CallId(1)).map(|s| s.name), Some("b"));
        assert_eq!(r.len(), 1);
    }
}
