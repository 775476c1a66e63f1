//! The argument value tree carried in a call payload.
//!
//! A captured call's arguments are a flat list of [`Value`]s. Structures are
//! a tagged union: a runtime type tag, a fixed field list, and an
//! [`ExtensionChain`] holding the structures that were linked through the
//! native "next" pointer. Chain links are owned by index, in chain order,
//! rather than through nested pointers.
//!
//! `Value` is generic over the handle representation. The wire form uses
//! [`CaptureId`]; after replay-side remapping the same tree carries
//! [`LiveHandle`](retrace_core::LiveHandle)s.

use retrace_core::{CaptureId, HandleCategory, ResultCode};

/// One argument, result, or structure field.
///
/// Nullable kinds (`Str`, `Bytes`, `Pointer`, `Array`) use `None` for a null
/// pointer, so `Array(Some(vec![]))` (a valid pointer to zero elements) and
/// `Array(None)` (a null pointer) are distinct values.
#[derive(Clone, Debug, PartialEq)]
pub enum Value<H = CaptureId> {
    /// Boolean (`VkBool32`, `BOOL`).
    Bool(bool),
    /// Unsigned byte.
    U8(u8),
    /// Unsigned 32-bit integer (enums, flags, counts).
    U32(u32),
    /// Signed 32-bit integer.
    I32(i32),
    /// Unsigned 64-bit integer (sizes, offsets).
    U64(u64),
    /// Signed 64-bit integer (result codes).
    I64(i64),
    /// 32-bit float.
    F32(f32),
    /// 64-bit float.
    F64(f64),
    /// An object handle of the given category.
    Handle {
        /// The handle's category.
        category: HandleCategory,
        /// The handle, as a capture identity or a live handle.
        handle: H,
    },
    /// A raw GPU virtual address.
    Address(u64),
    /// A nullable UTF-8 string.
    Str(Option<String>),
    /// A nullable opaque byte blob (shader code, initial data).
    Bytes(Option<Vec<u8>>),
    /// A nullable pointer to a single value.
    Pointer(Option<Box<Value<H>>>),
    /// A nullable array with an explicit element count.
    Array(Option<Vec<Value<H>>>),
    /// A structure with an optional extension chain.
    Struct(StructValue<H>),
}

/// A structure whose logical type is given by a runtime tag.
#[derive(Clone, Debug, PartialEq)]
pub struct StructValue<H = CaptureId> {
    /// Structure type tag (`sType`-style discriminant).
    pub type_tag: u32,
    /// Fields in declaration order.
    pub fields: Vec<Value<H>>,
    /// Structures linked through the native "next" pointer.
    pub chain: ExtensionChain<H>,
}

/// One structure in an extension chain.
#[derive(Clone, Debug, PartialEq)]
pub struct ChainLink<H = CaptureId> {
    /// Structure type tag of this link. Zero is reserved as the chain terminator.
    pub type_tag: u32,
    /// Fields in declaration order.
    pub fields: Vec<Value<H>>,
}

/// An ordered extension chain. Link `i`'s "next" is link `i + 1`.
#[derive(Clone, Debug, PartialEq)]
pub struct ExtensionChain<H = CaptureId> {
    links: Vec<ChainLink<H>>,
}

impl<H> Default for ExtensionChain<H> {
    fn default() -> Self {
        Self { links: Vec::new() }
    }
}

impl<H> ExtensionChain<H> {
    /// An empty chain (null "next" pointer).
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a link at the end of the chain.
    pub fn push(&mut self, link: ChainLink<H>) {
        self.links.push(link);
    }

    /// Links in chain order.
    pub fn links(&self) -> &[ChainLink<H>] {
        &self.links
    }

    /// Number of links.
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// Whether the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// The link following `index`, if any.
    pub fn next_of(&self, index: usize) -> Option<&ChainLink<H>> {
        self.links.get(index + 1)
    }

    /// First link with the given type tag.
    pub fn find(&self, type_tag: u32) -> Option<&ChainLink<H>> {
        self.links.iter().find(|l| l.type_tag == type_tag)
    }
}

impl<H> FromIterator<ChainLink<H>> for ExtensionChain<H> {
    fn from_iter<I: IntoIterator<Item = ChainLink<H>>>(iter: I) -> Self {
        Self {
            links: iter.into_iter().collect(),
        }
    }
}

impl<H> StructValue<H> {
    /// A structure with no extension chain.
    pub fn new(type_tag: u32, fields: Vec<Value<H>>) -> Self {
        Self {
            type_tag,
            fields,
            chain: ExtensionChain::new(),
        }
    }

    /// Builder-style chain extension.
    pub fn with_link(mut self, type_tag: u32, fields: Vec<Value<H>>) -> Self {
        self.chain.push(ChainLink { type_tag, fields });
        self
    }
}

impl<H> Value<H> {
    /// Short name of the value's kind, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::U8(_) => "u8",
            Value::U32(_) => "u32",
            Value::I32(_) => "i32",
            Value::U64(_) => "u64",
            Value::I64(_) => "i64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::Handle { .. } => "handle",
            Value::Address(_) => "address",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Pointer(_) => "pointer",
            Value::Array(_) => "array",
            Value::Struct(_) => "struct",
        }
    }

    /// Integer view of a size-like value (`U32`, `U64`, `Address`).
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::U8(v) => Some(v as u64),
            Value::U32(v) => Some(v as u64),
            Value::U64(v) | Value::Address(v) => Some(v),
            _ => None,
        }
    }

    /// The device address carried by an `Address` value.
    pub fn as_address(&self) -> Option<u64> {
        match *self {
            Value::Address(a) => Some(a),
            _ => None,
        }
    }

    /// The category and handle of a `Handle` value.
    pub fn as_handle(&self) -> Option<(HandleCategory, &H)> {
        match self {
            Value::Handle { category, handle } => Some((*category, handle)),
            _ => None,
        }
    }

    /// Interpret an integer value as a native result code.
    pub fn as_result_code(&self) -> Option<ResultCode> {
        match *self {
            Value::I32(v) => Some(ResultCode(v as i64)),
            Value::I64(v) => Some(ResultCode(v)),
            Value::U32(v) => Some(ResultCode::from_hresult(v)),
            _ => None,
        }
    }

    /// Rebuild the tree with every handle and address passed through the
    /// given functions. Everything else is copied unchanged.
    ///
    /// The first error aborts the walk.
    pub fn try_remap<G, E, FH, FA>(&self, on_handle: &mut FH, on_address: &mut FA) -> Result<Value<G>, E>
    where
        FH: FnMut(HandleCategory, &H) -> Result<G, E>,
        FA: FnMut(u64) -> Result<u64, E>,
    {
        Ok(match self {
            Value::Bool(v) => Value::Bool(*v),
            Value::U8(v) => Value::U8(*v),
            Value::U32(v) => Value::U32(*v),
            Value::I32(v) => Value::I32(*v),
            Value::U64(v) => Value::U64(*v),
            Value::I64(v) => Value::I64(*v),
            Value::F32(v) => Value::F32(*v),
            Value::F64(v) => Value::F64(*v),
            Value::Handle { category, handle } => Value::Handle {
                category: *category,
                handle: on_handle(*category, handle)?,
            },
            Value::Address(a) => Value::Address(on_address(*a)?),
            Value::Str(s) => Value::Str(s.clone()),
            Value::Bytes(b) => Value::Bytes(b.clone()),
            Value::Pointer(p) => match p {
                Some(inner) => Value::Pointer(Some(Box::new(inner.try_remap(on_handle, on_address)?))),
                None => Value::Pointer(None),
            },
            Value::Array(a) => match a {
                Some(items) => Value::Array(Some(
                    items
                        .iter()
                        .map(|v| v.try_remap(on_handle, on_address))
                        .collect::<Result<Vec<_>, E>>()?,
                )),
                None => Value::Array(None),
            },
            Value::Struct(s) => Value::Struct(s.try_remap(on_handle, on_address)?),
        })
    }

    /// Visit every handle in the tree, depth first, in field order.
    pub fn for_each_handle(&self, f: &mut dyn FnMut(HandleCategory, &H)) {
        match self {
            Value::Handle { category, handle } => f(*category, handle),
            Value::Pointer(Some(inner)) => inner.for_each_handle(f),
            Value::Array(Some(items)) => {
                for v in items {
                    v.for_each_handle(f);
                }
            }
            Value::Struct(s) => {
                for v in &s.fields {
                    v.for_each_handle(f);
                }
                for link in s.chain.links() {
                    for v in &link.fields {
                        v.for_each_handle(f);
                    }
                }
            }
            _ => {}
        }
    }
}

impl<H> StructValue<H> {
    fn try_remap<G, E, FH, FA>(&self, on_handle: &mut FH, on_address: &mut FA) -> Result<StructValue<G>, E>
    where
        FH: FnMut(HandleCategory, &H) -> Result<G, E>,
        FA: FnMut(u64) -> Result<u64, E>,
    {
        let fields = self
            .fields
            .iter()
            .map(|v| v.try_remap(on_handle, on_address))
            .collect::<Result<Vec<_>, E>>()?;
        let chain = self
            .chain
            .links()
            .iter()
            .map(|link| {
                Ok(ChainLink {
                    type_tag: link.type_tag,
                    fields: link
                        .fields
                        .iter()
                        .map(|v| v.try_remap(on_handle, on_address))
                        .collect::<Result<Vec<_>, E>>()?,
                })
            })
            .collect::<Result<ExtensionChain<G>, E>>()?;
        Ok(StructValue {
            type_tag: self.type_tag,
            fields,
            chain,
        })
    }
}

impl Value<CaptureId> {
    /// A handle value in wire form.
    pub fn handle(category: HandleCategory, id: CaptureId) -> Self {
        Value::Handle {
            category,
            handle: id,
        }
    }
}
