/// Primitive number types whose in-memory representation is 1 byte aligned.
pub trait Align1: bytemuck::Pod {}

impl Align1 for u8 {}
impl Align1 for u32 {}
impl Align1 for u64 {}
impl Align1 for f32 {}

/// Primitive number types at least 4 bytes aligned.
///
/// Receive buffers of these types guarantee that `f32` payloads, which start 4
/// bytes after the beginning of a frame, can be reinterpreted without copying.
pub trait Align4: Align1 {}

impl Align4 for u32 {}
impl Align4 for u64 {}
impl Align4 for f32 {}
