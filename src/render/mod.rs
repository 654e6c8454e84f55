//! RenderAssembler: turns a frame's collected render passes
//! into concrete draw operations, sorted by depth where requested.
//!
//! Grounded on the materializer's size-classed recycling discipline
//! ([`crate::materializer::BufferPool`]) applied here to the one transient
//! allocation this stage would otherwise make every frame: the depth-sort
//! index array.

use rustc_hash::FxHashMap;

use crate::runtime::banks::Shape2d;

/// Pooled `u32` index buffers recycled across frames, used only to hold a
/// depth-sort permutation while a pass's attributes are reordered.
#[derive(Default)]
pub struct IndexPool {
    classes: FxHashMap<usize, Vec<Vec<u32>>>,
}

impl IndexPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn size_class(len: usize) -> usize {
        len.next_power_of_two().max(1)
    }

    /// Takes an identity permutation `[0, 1, ..., len)`, recycling a pooled
    /// buffer of the matching size class when one is available.
    pub fn acquire_identity(&mut self, len: usize) -> Vec<u32> {
        let class = Self::size_class(len);
        let mut buf = self.classes.get_mut(&class).and_then(Vec::pop).unwrap_or_else(|| Vec::with_capacity(class));
        buf.clear();
        buf.extend(0..u32::try_from(len).unwrap_or(u32::MAX));
        buf
    }

    /// Returns a permutation buffer to the pool.
    pub fn release(&mut self, buf: Vec<u32>) {
        let class = Self::size_class(buf.capacity());
        self.classes.entry(class).or_default().push(buf);
    }
}

/// One render pass's resolved attribute buffers, already pulled out of this
/// frame's evaluated slots by the caller. Every per-instance attribute is
/// `instance_count` lanes wide at its declared stride (position/scale2 are
/// `3`/`2`; size/rotation are `1`; color is `4`); a block that didn't wire an
/// optional attribute leaves its buffer empty.
pub struct DrawInput {
    /// Packed topology record for this pass's shape.
    pub shape: Shape2d,
    /// Per-instance world position, stride 3.
    pub position: Vec<f32>,
    /// Per-instance size, stride 1.
    pub size: Vec<f32>,
    /// Per-instance color, stride 4.
    pub color: Vec<f32>,
    /// Per-instance rotation (radians), stride 1.
    pub rotation: Vec<f32>,
    /// Per-instance non-uniform scale, stride 2.
    pub scale2: Vec<f32>,
    /// Control-point field already resolved by the caller, if this
    /// topology's `pointsCount` word is nonzero.
    pub control_points: Vec<f32>,
    /// `true` if this pass is depth-sorted by `position.z`.
    pub sorted: bool,
}

/// One concrete draw operation. Attribute buffers are
/// already in final draw order; a sorted pass has been permuted by depth,
/// an unsorted one is a straight copy of its `DrawInput`.
pub struct DrawOp {
    /// Topology id (`shape.words[0]`).
    pub topology_id: u32,
    /// Resolved control points.
    pub control_points: Vec<f32>,
    /// Number of instances this operation draws.
    pub instance_count: u32,
    /// Position attribute, in draw order.
    pub position_view: Vec<f32>,
    /// Size attribute, in draw order.
    pub size_view: Vec<f32>,
    /// Color attribute, in draw order.
    pub color_view: Vec<f32>,
    /// Rotation attribute, in draw order.
    pub rotation_view: Vec<f32>,
    /// Scale attribute, in draw order.
    pub scale2_view: Vec<f32>,
    /// Opaque style key (`shape.words[3]`), used by a backend to batch by
    /// pipeline/material without the assembler knowing what it means.
    pub style_key: u32,
}

const fn word_topology_id(shape: &Shape2d) -> u32 {
    shape.words[0]
}

const fn word_points_count(shape: &Shape2d) -> u32 {
    shape.words[2]
}

const fn word_style_ref(shape: &Shape2d) -> u32 {
    shape.words[3]
}

/// Assembles draw operations from this frame's collected render passes,
/// reusing its index pool across frames.
#[derive(Default)]
pub struct RenderAssembler {
    index_pool: IndexPool,
}

impl RenderAssembler {
    /// Creates an assembler with an empty index pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds one [`DrawOp`] per pass, in input order. A pass with
    /// `sorted = true` is permuted back-to-front by `position.z` first.
    pub fn assemble(&mut self, passes: &[DrawInput]) -> Vec<DrawOp> {
        passes.iter().map(|pass| self.assemble_one(pass)).collect()
    }

    fn assemble_one(&mut self, pass: &DrawInput) -> DrawOp {
        let instance_count = if pass.position.is_empty() {
            u32::try_from(pass.size.len()).unwrap_or(0)
        } else {
            u32::try_from(pass.position.len() / 3).unwrap_or(0)
        };

        if pass.sorted && instance_count > 1 {
            let order = self.depth_order(pass, instance_count);
            let op = DrawOp {
                topology_id: word_topology_id(&pass.shape),
                control_points: pass.control_points.clone(),
                instance_count,
                position_view: permute(&pass.position, &order, 3),
                size_view: permute(&pass.size, &order, 1),
                color_view: permute(&pass.color, &order, 4),
                rotation_view: permute(&pass.rotation, &order, 1),
                scale2_view: permute(&pass.scale2, &order, 2),
                style_key: word_style_ref(&pass.shape),
            };
            self.index_pool.release(order);
            op
        } else {
            DrawOp {
                topology_id: word_topology_id(&pass.shape),
                control_points: pass.control_points.clone(),
                instance_count,
                position_view: pass.position.clone(),
                size_view: pass.size.clone(),
                color_view: pass.color.clone(),
                rotation_view: pass.rotation.clone(),
                scale2_view: pass.scale2.clone(),
                style_key: word_style_ref(&pass.shape),
            }
        }
    }

    fn depth_order(&mut self, pass: &DrawInput, instance_count: u32) -> Vec<u32> {
        let mut order = self.index_pool.acquire_identity(instance_count as usize);
        order.sort_unstable_by(|&a, &b| {
            let za = pass.position.get(a as usize * 3 + 2).copied().unwrap_or(0.0);
            let zb = pass.position.get(b as usize * 3 + 2).copied().unwrap_or(0.0);
            za.total_cmp(&zb)
        });
        order
    }
}

fn permute(src: &[f32], order: &[u32], stride: usize) -> Vec<f32> {
    if src.is_empty() {
        return Vec::new();
    }
    let mut out = vec![0.0; order.len() * stride];
    for (dst_lane, &src_lane) in order.iter().enumerate() {
        let src_base = src_lane as usize * stride;
        let dst_base = dst_lane * stride;
        for c in 0..stride {
            out[dst_base + c] = src.get(src_base + c).copied().unwrap_or(0.0);
        }
    }
    out
}

/// Asserts `controlPointsFieldSlot`'s field has exactly `pointsCount`
/// points; callers resolving the field before building a [`DrawInput`]
/// should trust this word, not the resolved buffer's own length.
#[must_use]
pub const fn declared_points_count(shape: &Shape2d) -> u32 {
    word_points_count(shape)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(topology_id: u32, style_ref: u32) -> Shape2d {
        Shape2d {
            words: [topology_id, 0, 0, style_ref, 0, 0, 0, 0],
        }
    }

    #[test]
    fn unsorted_pass_preserves_input_order() {
        let mut assembler = RenderAssembler::new();
        let pass = DrawInput {
            shape: shape(1, 7),
            position: vec![0.0, 0.0, 2.0, 0.0, 0.0, 1.0],
            size: vec![1.0, 1.0],
            color: vec![1.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0],
            rotation: vec![0.0, 0.0],
            scale2: vec![1.0, 1.0, 1.0, 1.0],
            control_points: Vec::new(),
            sorted: false,
        };
        let ops = assembler.assemble(&[pass]);
        assert_eq!(ops[0].instance_count, 2);
        assert_eq!(ops[0].position_view, vec![0.0, 0.0, 2.0, 0.0, 0.0, 1.0]);
        assert_eq!(ops[0].style_key, 7);
    }

    #[test]
    fn sorted_pass_orders_back_to_front_by_z() {
        let mut assembler = RenderAssembler::new();
        let pass = DrawInput {
            shape: shape(1, 0),
            position: vec![0.0, 0.0, 5.0, 0.0, 0.0, 1.0, 0.0, 0.0, 3.0],
            size: vec![1.0, 1.0, 1.0],
            color: Vec::new(),
            rotation: Vec::new(),
            scale2: Vec::new(),
            control_points: Vec::new(),
            sorted: true,
        };
        let ops = assembler.assemble(&[pass]);
        let zs: Vec<f32> = ops[0].position_view.chunks(3).map(|c| c[2]).collect();
        assert_eq!(zs, vec![1.0, 3.0, 5.0]);
    }

    #[test]
    fn index_pool_reuses_released_buffers() {
        let mut pool = IndexPool::new();
        let buf = pool.acquire_identity(4);
        pool.release(buf);
        let reused = pool.acquire_identity(4);
        assert_eq!(reused, vec![0, 1, 2, 3]);
    }
}
