//! Optional debug-info tables consumed by the stack pass.

use std::collections::BTreeMap;

use mcl_ir::Type;

/// A local variable described by debug info.
#[derive(Clone, Debug)]
pub struct DebugVariable {
    pub name: String,
    /// Offset from the stack pointer when the variable lives on the
    /// stack; `None` for register-allocated locals.
    pub stack_offset: Option<i64>,
    pub ty: Type,
}

impl DebugVariable {
    pub fn on_stack(name: &str, offset: i64, ty: Type) -> Self {
        Self {
            name: name.to_string(),
            stack_offset: Some(offset),
            ty,
        }
    }
}

/// Debug info for one function.
#[derive(Clone, Debug, Default)]
pub struct DebugFunction {
    pub name: String,
    pub locals: Vec<DebugVariable>,
}

impl DebugFunction {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            locals: Vec::new(),
        }
    }

    /// Find the stack local declared at the given offset.
    pub fn local_at_offset(&self, offset: i64) -> Option<&DebugVariable> {
        self.locals
            .iter()
            .find(|v| v.stack_offset == Some(offset))
    }
}

/// Debug info for a whole binary, keyed by function start address.
#[derive(Clone, Debug, Default)]
pub struct DebugInfo {
    functions: BTreeMap<u64, DebugFunction>,
}

impl DebugInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_function(&mut self, address: u64, function: DebugFunction) {
        self.functions.insert(address, function);
    }

    pub fn function_at(&self, address: u64) -> Option<&DebugFunction> {
        self.functions.get(&address)
    }

    /// Addresses of all described functions, for worklist seeding.
    pub fn function_addresses(&self) -> impl Iterator<Item = u64> + '_ {
        self.functions.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_at_offset() {
        let mut f = DebugFunction::new("main");
        f.locals
            .push(DebugVariable::on_stack("counter", 8, Type::Int(32)));
        assert_eq!(f.local_at_offset(8).unwrap().name, "counter");
        assert!(f.local_at_offset(16).is_none());
    }

    #[test]
    fn test_function_lookup() {
        let mut info = DebugInfo::new();
        info.insert_function(0x1000, DebugFunction::new("main"));
        assert!(info.function_at(0x1000).is_some());
        assert!(info.function_at(0x2000).is_none());
        assert_eq!(info.function_addresses().collect::<Vec<_>>(), vec![0x1000]);
    }
}
