//! Serialized program layout, plus a builder for producing programs.
//!
//! Layout:
//! ```text
//! ┌──────────────────────────────────┐
//! │ Table length: u32 LE             │
//! │ Identifier: "ET12" (4 bytes)     │
//! ├──────────────────────────────────┤
//! │ Method table (JSON)              │
//! ├──────────────────────────────────┤
//! │ Padding to 16-byte alignment     │
//! ├──────────────────────────────────┤
//! │ Constant segment                 │
//! └──────────────────────────────────┘
//! ```
//!
//! The layout is private to one build of the runtime; it is not meant to be
//! exchanged between versions.

use serde::{Deserialize, Serialize};

use super::dim_order::{dim_order_to_stride, is_valid_dim_order, MAX_DIM};
use super::evalue::Tag;
use super::pal::et_log;
use super::tensor::{ScalarType, TensorShapeDynamism};
use super::{Error, Result};

/// Bytes before the method table.
pub const HEADER_LEN: usize = 8;

/// First half of the file identifier.
pub const MAGIC: &[u8; 2] = b"ET";

/// Format version this runtime reads, second half of the file identifier.
pub const VERSION: &[u8; 2] = b"12";

/// Alignment of the constant segment and of every constant inside it.
pub const SEGMENT_ALIGNMENT: usize = 16;

/// Outcome of looking for a program header.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgramHeaderStatus {
    /// A program header of a version this runtime reads.
    CompatibleVersion = 0,
    /// A program header of a different version.
    IncompatibleVersion = 1,
    /// No recognizable header.
    NotPresent = 2,
    /// Fewer bytes than a header needs.
    ShortData = 3,
}

/// Inspects the first bytes of a program.
pub fn check_header(data: &[u8]) -> ProgramHeaderStatus {
    if data.len() < HEADER_LEN {
        return ProgramHeaderStatus::ShortData;
    }
    let (magic, version) = (&data[4..6], &data[6..8]);
    if magic != MAGIC || !version.iter().all(u8::is_ascii_digit) {
        return ProgramHeaderStatus::NotPresent;
    }
    if version == VERSION {
        ProgramHeaderStatus::CompatibleVersion
    } else {
        ProgramHeaderStatus::IncompatibleVersion
    }
}

/// Length of the method table declared by a header.
pub fn table_len(header: &[u8]) -> usize {
    u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize
}

/// Offset of the constant segment for a table of `table_len` bytes.
pub fn segment_offset(table_len: usize) -> usize {
    (HEADER_LEN + table_len).next_multiple_of(SEGMENT_ALIGNMENT)
}

/// Root of the method table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgramTable {
    pub methods: Vec<MethodPlan>,
}

/// One entry point of a program.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MethodPlan {
    pub name: String,
    pub values: Vec<ValueDef>,
    /// Value indices of the inputs, in order.
    pub inputs: Vec<usize>,
    /// Value indices of the outputs, in order.
    pub outputs: Vec<usize>,
    pub instructions: Vec<Instruction>,
    /// Sizes in bytes of the memory-planned buffers.
    #[serde(default)]
    pub memory_planned_buffers: Vec<u64>,
    /// Delegate backends the method was lowered to.
    #[serde(default)]
    pub backends: Vec<String>,
}

/// A kernel call. `args` are value indices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub op: String,
    pub args: Vec<usize>,
}

/// Initial content of one slot of the value table.
///
/// List variants other than bools and doubles refer to other slots by index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum ValueDef {
    None,
    Int(i64),
    Double(f64),
    Bool(bool),
    String(String),
    Tensor(TensorDef),
    IntList(Vec<usize>),
    DoubleList(Vec<f64>),
    BoolList(Vec<bool>),
    TensorList(Vec<usize>),
    OptionalTensorList(Vec<Option<usize>>),
}

impl ValueDef {
    pub fn tag(&self) -> Tag {
        match self {
            ValueDef::None => Tag::None,
            ValueDef::Int(_) => Tag::Int,
            ValueDef::Double(_) => Tag::Double,
            ValueDef::Bool(_) => Tag::Bool,
            ValueDef::String(_) => Tag::String,
            ValueDef::Tensor(_) => Tag::Tensor,
            ValueDef::IntList(_) => Tag::ListInt,
            ValueDef::DoubleList(_) => Tag::ListDouble,
            ValueDef::BoolList(_) => Tag::ListBool,
            ValueDef::TensorList(_) => Tag::ListTensor,
            ValueDef::OptionalTensorList(_) => Tag::ListOptionalTensor,
        }
    }
}

/// Where a tensor's bytes live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TensorData {
    /// Inside the constant segment.
    Constant { offset: usize, nbytes: usize },
    /// Inside a memory-planned buffer.
    Planned { buffer: u32, offset: usize },
    /// Provided at run time through `set_input`.
    #[default]
    Unallocated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorDef {
    pub scalar_type: ScalarType,
    pub sizes: Vec<i32>,
    /// Empty means contiguous.
    #[serde(default)]
    pub dim_order: Vec<u8>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub dynamism: TensorShapeDynamism,
    #[serde(default)]
    pub data: TensorData,
}

impl TensorDef {
    pub fn new(scalar_type: ScalarType, sizes: &[i32]) -> Self {
        Self {
            scalar_type,
            sizes: sizes.to_vec(),
            dim_order: Vec::new(),
            name: String::new(),
            dynamism: TensorShapeDynamism::Static,
            data: TensorData::Unallocated,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_data(mut self, data: TensorData) -> Self {
        self.data = data;
        self
    }

    pub fn planned(self, buffer: u32, offset: usize) -> Self {
        self.with_data(TensorData::Planned { buffer, offset })
    }

    pub fn with_dim_order(mut self, dim_order: &[u8]) -> Self {
        self.dim_order = dim_order.to_vec();
        self
    }

    pub fn with_dynamism(mut self, dynamism: TensorShapeDynamism) -> Self {
        self.dynamism = dynamism;
        self
    }

    /// Element count, or `None` when the shape overflows `usize`.
    pub fn numel(&self) -> Option<usize> {
        self.sizes
            .iter()
            .try_fold(1usize, |acc, &s| acc.checked_mul(s.max(0) as usize))
    }

    pub fn nbytes(&self) -> Option<usize> {
        self.numel()?.checked_mul(self.scalar_type.element_size())
    }

    pub fn is_memory_planned(&self) -> bool {
        matches!(self.data, TensorData::Planned { .. })
    }
}

impl MethodPlan {
    /// Fills in the implicit contiguous dim orders.
    pub(crate) fn normalize(&mut self) {
        for value in &mut self.values {
            if let ValueDef::Tensor(tensor) = value {
                if tensor.dim_order.is_empty() && !tensor.sizes.is_empty() {
                    tensor.dim_order = (0..tensor.sizes.len() as u8).collect();
                }
            }
        }
    }

    /// Checks every index, layout and memory range of the plan.
    pub(crate) fn validate(&self, segment_len: usize) -> Result<()> {
        let n_values = self.values.len();
        let tag_of = |index: usize| self.values.get(index).map(ValueDef::tag);

        for (kind, indices) in [("input", &self.inputs), ("output", &self.outputs)] {
            for &index in indices {
                if index >= n_values {
                    return Err(self.invalid(format_args!("{kind} value {index} >= {n_values}")));
                }
            }
        }
        for &index in &self.inputs {
            if let ValueDef::Tensor(tensor) = &self.values[index] {
                if matches!(tensor.data, TensorData::Constant { .. }) {
                    return Err(self.invalid(format_args!("input value {index} is a constant")));
                }
            }
        }
        for (i, instruction) in self.instructions.iter().enumerate() {
            if let Some(&bad) = instruction.args.iter().find(|&&a| a >= n_values) {
                return Err(self.invalid(format_args!(
                    "instruction {i} ({}) refers to value {bad} >= {n_values}",
                    instruction.op
                )));
            }
        }
        for (index, value) in self.values.iter().enumerate() {
            match value {
                ValueDef::Tensor(tensor) => self.validate_tensor(index, tensor, segment_len)?,
                ValueDef::IntList(items) => {
                    if items.iter().any(|&i| tag_of(i) != Some(Tag::Int)) {
                        return Err(self.invalid(format_args!("int list {index} has a non-int element")));
                    }
                }
                ValueDef::TensorList(items) => {
                    if items.iter().any(|&i| tag_of(i) != Some(Tag::Tensor)) {
                        return Err(self.invalid(format_args!(
                            "tensor list {index} has a non-tensor element"
                        )));
                    }
                }
                ValueDef::OptionalTensorList(items) => {
                    let bad = items
                        .iter()
                        .flatten()
                        .any(|&i| !matches!(tag_of(i), Some(Tag::Tensor | Tag::None)));
                    if bad {
                        return Err(self.invalid(format_args!(
                            "optional tensor list {index} has a non-tensor element"
                        )));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn invalid(&self, what: std::fmt::Arguments<'_>) -> Error {
        et_log!(Error, "method '{}': {}", self.name, what);
        Error::InvalidProgram
    }

    fn validate_tensor(&self, index: usize, tensor: &TensorDef, segment_len: usize) -> Result<()> {
        let fail = |what: &str| {
            et_log!(Error, "method '{}': tensor {}: {}", self.name, index, what);
            Err(Error::InvalidProgram)
        };
        if tensor.sizes.len() > MAX_DIM {
            return fail("too many dimensions");
        }
        if tensor.sizes.iter().any(|&s| s < 0) {
            return fail("negative size");
        }
        if tensor.dim_order.len() != tensor.sizes.len() || !is_valid_dim_order(&tensor.dim_order) {
            return fail("invalid dim order");
        }
        let Some(nbytes) = tensor.nbytes() else {
            return fail("shape overflows");
        };
        let mut strides = [0i32; MAX_DIM];
        if dim_order_to_stride(&tensor.sizes, &tensor.dim_order, &mut strides[..tensor.sizes.len()]).is_err() {
            return fail("strides overflow");
        }
        match tensor.data {
            TensorData::Constant {
                offset,
                nbytes: stored,
            } => {
                if stored != nbytes {
                    return fail("constant size does not match its shape");
                }
                if offset.checked_add(nbytes).map_or(true, |end| end > segment_len) {
                    return fail("constant out of segment bounds");
                }
            }
            TensorData::Planned { buffer, offset } => {
                let Some(&size) = self.memory_planned_buffers.get(buffer as usize) else {
                    return fail("unknown planned buffer");
                };
                if offset.checked_add(nbytes).map_or(true, |end| end as u64 > size) {
                    return fail("planned range out of buffer bounds");
                }
            }
            TensorData::Unallocated => {}
        }
        Ok(())
    }
}

/// Element types that can be stored in the constant segment.
pub trait ConstantElement: Copy {
    fn write_le(self, out: &mut Vec<u8>);
}

macro_rules! constant_element {
    ($($t:ty),*) => {
        $(impl ConstantElement for $t {
            fn write_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }
        })*
    };
}

constant_element!(u8, i8, i16, i32, i64, f32, f64);

impl ConstantElement for bool {
    fn write_le(self, out: &mut Vec<u8>) {
        out.push(self as u8);
    }
}

/// Assembles a serialized program.
#[derive(Debug, Clone, Default)]
pub struct ProgramBuilder {
    methods: Vec<MethodPlan>,
    segment: Vec<u8>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends constant data and returns where it was placed.
    pub fn constant<T: ConstantElement>(&mut self, values: &[T]) -> TensorData {
        let offset = self.segment.len().next_multiple_of(SEGMENT_ALIGNMENT);
        self.segment.resize(offset, 0);
        for &value in values {
            value.write_le(&mut self.segment);
        }
        TensorData::Constant {
            offset,
            nbytes: self.segment.len() - offset,
        }
    }

    pub fn add_method(&mut self, plan: MethodPlan) -> &mut Self {
        self.methods.push(plan);
        self
    }

    pub fn build(&self) -> serde_json::Result<Vec<u8>> {
        let table = serde_json::to_vec(&ProgramTable {
            methods: self.methods.clone(),
        })?;
        let mut out = Vec::with_capacity(segment_offset(table.len()) + self.segment.len());
        out.extend_from_slice(&(table.len() as u32).to_le_bytes());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(VERSION);
        out.extend_from_slice(&table);
        out.resize(segment_offset(table.len()), 0);
        out.extend_from_slice(&self.segment);
        Ok(out)
    }
}

/// Builds one [`MethodPlan`] value by value.
#[derive(Debug, Clone)]
pub struct MethodBuilder {
    plan: MethodPlan,
}

impl MethodBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            plan: MethodPlan {
                name: name.into(),
                ..MethodPlan::default()
            },
        }
    }

    /// Adds a value and returns its index.
    pub fn value(&mut self, value: ValueDef) -> usize {
        self.plan.values.push(value);
        self.plan.values.len() - 1
    }

    pub fn tensor(&mut self, tensor: TensorDef) -> usize {
        self.value(ValueDef::Tensor(tensor))
    }

    /// Adds a memory-planned buffer of `size` bytes and returns its id.
    pub fn planned_buffer(&mut self, size: u64) -> u32 {
        self.plan.memory_planned_buffers.push(size);
        (self.plan.memory_planned_buffers.len() - 1) as u32
    }

    pub fn input(&mut self, index: usize) -> &mut Self {
        self.plan.inputs.push(index);
        self
    }

    pub fn output(&mut self, index: usize) -> &mut Self {
        self.plan.outputs.push(index);
        self
    }

    pub fn instruction(&mut self, op: &str, args: &[usize]) -> &mut Self {
        self.plan.instructions.push(Instruction {
            op: op.to_string(),
            args: args.to_vec(),
        });
        self
    }

    pub fn backend(&mut self, name: impl Into<String>) -> &mut Self {
        self.plan.backends.push(name.into());
        self
    }

    pub fn build(self) -> MethodPlan {
        self.plan
    }
}
