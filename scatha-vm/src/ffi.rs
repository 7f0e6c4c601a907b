//! Foreign function interface.
//!
//! The binary trailer names shared libraries and the functions to import
//! from them. At load time each declaration resolves to a [`ForeignFunction`]
//! installed at its declared index; the `cfng` instruction gathers arguments
//! from consecutive registers, dereferences pointer-typed arguments once and
//! invokes the host symbol through libffi.
//!
//! The actual `dlopen`/`ffi_call` machinery sits behind the `ffi` cargo
//! feature. Without the feature a program that imports foreign functions is
//! rejected at load time.

#[cfg(feature = "ffi")]
use scatha_asm::FfiLibDecl;
use scatha_asm::{FfiType, VirtualPointer};

use crate::error::{FfiError, VmResult};
use crate::vm::VirtualMachine;

/// A resolved foreign function.
pub struct ForeignFunction {
    pub name: String,
    pub arg_types: Vec<FfiType>,
    pub return_type: FfiType,
    #[cfg(feature = "ffi")]
    imp: imp::LoadedFunction,
}

impl std::fmt::Debug for ForeignFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForeignFunction")
            .field("name", &self.name)
            .field("arg_types", &self.arg_types)
            .field("return_type", &self.return_type)
            .finish_non_exhaustive()
    }
}

impl VirtualMachine {
    /// Invoke foreign function `index` with arguments starting at register
    /// `arg_base`.
    pub(crate) fn call_foreign(
        &mut self,
        arg_base: usize,
        index: usize,
    ) -> VmResult<()> {
        let function = self
            .foreign
            .get(index)
            .and_then(|f| f.as_ref())
            .ok_or(FfiError::NotLoaded(index))?;
        // Dereference pointer arguments once: the host sees native pointers.
        let mut natives: Vec<u64> = Vec::with_capacity(function.arg_types.len());
        let mut slot = arg_base;
        for ty in &function.arg_types {
            let bits = self.registers[slot];
            if ty.is_pointer() {
                let ptr = VirtualPointer::from_bits(bits);
                let range = self.memory.valid_range(ptr)?;
                let native = self.memory.dereference(ptr, range)?;
                natives.push(native.as_ptr() as u64);
            } else {
                natives.push(bits);
            }
            slot += ty.register_slots().max(1);
        }
        #[cfg(feature = "ffi")]
        {
            let result = imp::invoke(function, &natives)?;
            self.registers[arg_base] = result;
            Ok(())
        }
        #[cfg(not(feature = "ffi"))]
        {
            let _ = natives;
            Err(FfiError::Unsupported.into())
        }
    }
}

#[cfg(feature = "ffi")]
pub(crate) fn load_libraries(
    vm: &mut VirtualMachine,
    decls: &[FfiLibDecl],
) -> VmResult<()> {
    for lib_decl in decls {
        let library = unsafe { libloading::Library::new(&lib_decl.name) }
            .map_err(|_| FfiError::LibraryNotFound(lib_decl.name.clone()))?;
        for decl in &lib_decl.functions {
            let symbol_name = format!("sc_ffi_{}", decl.name);
            let imp = imp::load(&library, &symbol_name, decl)?;
            let index = decl.index as usize;
            if vm.foreign.len() <= index {
                vm.foreign.resize_with(index + 1, || None);
            }
            vm.foreign[index] = Some(ForeignFunction {
                name: decl.name.clone(),
                arg_types: decl.arg_types.clone(),
                return_type: decl.return_type,
                imp,
            });
        }
        vm.libraries.push(library);
    }
    Ok(())
}

#[cfg(feature = "ffi")]
mod imp {
    use libffi::middle::{Arg, Cif, CodePtr, Type};
    use scatha_asm::{FfiFuncDecl, FfiType};

    use crate::error::{FfiError, VmResult};

    use super::ForeignFunction;

    pub(crate) struct LoadedFunction {
        cif: Cif,
        code: CodePtr,
    }

    fn ffi_type(ty: FfiType) -> Type {
        match ty {
            FfiType::Void => Type::void(),
            FfiType::Int8 => Type::i8(),
            FfiType::Int16 => Type::i16(),
            FfiType::Int32 => Type::i32(),
            FfiType::Int64 => Type::i64(),
            FfiType::Float => Type::f32(),
            FfiType::Double => Type::f64(),
            FfiType::Pointer | FfiType::ArrayPointer => Type::pointer(),
        }
    }

    pub(crate) fn load(
        library: &libloading::Library,
        symbol_name: &str,
        decl: &FfiFuncDecl,
    ) -> VmResult<LoadedFunction> {
        let symbol: libloading::Symbol<'_, *const ()> = unsafe {
            library.get(symbol_name.as_bytes()).map_err(|_| {
                FfiError::MissingSymbol(symbol_name.to_owned())
            })?
        };
        let cif = Cif::new(
            decl.arg_types.iter().copied().map(ffi_type),
            ffi_type(decl.return_type),
        );
        Ok(LoadedFunction { cif, code: CodePtr(*symbol as *mut _) })
    }

    pub(crate) fn invoke(
        function: &ForeignFunction,
        natives: &[u64],
    ) -> VmResult<u64> {
        let args: Vec<Arg> = natives.iter().map(Arg::new).collect();
        // Safety: the cif was built from the declared signature and every
        // pointer argument has been translated to a live native pointer.
        let result: u64 =
            unsafe { function.imp.cif.call(function.imp.code, &args) };
        Ok(result)
    }
}
