//! The IR module: functions, globals and constant data.

use crate::function::Function;
use crate::types::TypeId;
use crate::value::{ConstDataRef, FuncRef, GlobalRef};

/// Module-level constant byte data, e.g. string literals as `[i8; N]`.
#[derive(Debug, Clone)]
pub struct ConstantData {
    pub name: String,
    pub ty: TypeId,
    pub bytes: Vec<u8>,
}

/// A mutable global variable with a constant initializer.
#[derive(Debug, Clone)]
pub struct Global {
    pub name: String,
    pub ty: TypeId,
    pub initializer: Vec<u8>,
}

/// Declaration of an externally provided (foreign) function.
#[derive(Debug, Clone)]
pub struct ForeignFunctionDecl {
    pub name: String,
    /// Library the function is imported from.
    pub library: String,
    pub index: u32,
    pub param_types: Vec<TypeId>,
    pub return_ty: TypeId,
}

/// A whole translation unit.
#[derive(Debug, Default)]
pub struct Module {
    functions: Vec<Function>,
    pub constant_data: Vec<ConstantData>,
    pub globals: Vec<Global>,
    pub foreign_functions: Vec<ForeignFunctionDecl>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_function(&mut self, function: Function) -> FuncRef {
        let id = FuncRef(self.functions.len() as u32);
        self.functions.push(function);
        id
    }

    pub fn add_constant_data(&mut self, data: ConstantData) -> ConstDataRef {
        let id = ConstDataRef(self.constant_data.len() as u32);
        self.constant_data.push(data);
        id
    }

    pub fn add_global(&mut self, global: Global) -> GlobalRef {
        let id = GlobalRef(self.globals.len() as u32);
        self.globals.push(global);
        id
    }

    pub fn function(&self, id: FuncRef) -> &Function {
        &self.functions[id.0 as usize]
    }

    pub fn function_mut(&mut self, id: FuncRef) -> &mut Function {
        &mut self.functions[id.0 as usize]
    }

    pub fn function_refs(&self) -> impl Iterator<Item = FuncRef> {
        (0..self.functions.len() as u32).map(FuncRef)
    }

    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.functions.iter()
    }

    pub fn functions_mut(&mut self) -> impl Iterator<Item = &mut Function> {
        self.functions.iter_mut()
    }

    pub fn num_functions(&self) -> usize {
        self.functions.len()
    }

    pub fn function_by_name(&self, name: &str) -> Option<FuncRef> {
        self.function_refs()
            .find(|id| self.function(*id).name == name)
    }

    /// Borrow two distinct functions mutably, e.g. inliner caller/callee.
    pub fn function_pair_mut(
        &mut self,
        a: FuncRef,
        b: FuncRef,
    ) -> (&mut Function, &Function) {
        assert_ne!(a, b);
        let (a, b) = (a.0 as usize, b.0 as usize);
        if a < b {
            let (left, right) = self.functions.split_at_mut(b);
            (&mut left[a], &right[0])
        } else {
            let (left, right) = self.functions.split_at_mut(a);
            (&mut right[0], &left[b])
        }
    }
}
