//! Small IR surgery helpers.

use crate::module::{Module, StackSlot};
use crate::ty::Ty;
use crate::value::{FunctionId, SlotId};

/// Helper for IR modifications that must stay consistent across call sites.
pub struct IrModifier<'m> {
    module: &'m mut Module,
}

impl<'m> IrModifier<'m> {
    pub fn new(module: &'m mut Module) -> Self {
        Self { module }
    }

    /// Stack slot for `(function, offset, ty)`, memoized: asking twice for
    /// the same key returns the same slot.
    pub fn stack_slot(
        &mut self,
        function: FunctionId,
        offset: i64,
        ty: Ty,
        name: &str,
        from_debug: bool,
    ) -> SlotId {
        if let Some(existing) = self.module.find_slot(function, offset, &ty) {
            return existing;
        }
        self.module.add_slot(StackSlot {
            function,
            offset,
            ty,
            name: name.to_string(),
            from_debug,
        })
    }
}
