//! The virtual machine: registers, compare flags, execution frames and the
//! public execution API.

use std::io::{self, BufRead, Write};

use rand::rngs::SmallRng;
use rand::SeedableRng;
use scatha_asm::{ProgramView, VirtualPointer};

use crate::builtin::{make_builtin_table, BuiltinFunction};
use crate::error::VmResult;
use crate::ffi::ForeignFunction;
use crate::memory::VirtualMemory;

/// Number of general purpose registers a fresh VM provides.
pub const DEFAULT_REGISTER_COUNT: usize = 1 << 16;

/// Default byte size of the VM stack.
pub const DEFAULT_STACK_SIZE: usize = 1 << 20;

/// Upper bound of registers a single call frame may use. Used to place the
/// register window of a fresh execution frame past the caller's window.
pub const MAX_CALLFRAME_REGISTER_COUNT: usize = 256;

/// Register slots between caller and callee windows holding the saved stack
/// pointer, the register offset and the return address.
pub const CALL_METADATA_SIZE: usize = 3;

/// Poison byte written over the register file on reset.
const REGISTER_CLOBBER_BYTE: u8 = 0xcf;

/// Result flags of the last compare or test instruction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompareFlags {
    pub less: bool,
    pub equal: bool,
}

/// State of one invocation of the virtual machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionFrame {
    /// Base index of the current register window.
    pub reg_base: usize,
    /// Window base of the frame that entered execution; reaching it again in
    /// `ret` terminates the invocation.
    pub bottom_reg: usize,
    /// Instruction offset into the binary.
    pub iptr: usize,
    pub stack_ptr: VirtualPointer,
}

/// Execution statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct VmStats {
    pub executed_instructions: u64,
}

/// A single-threaded register-windowed bytecode interpreter.
///
/// Host callbacks may re-enter the same VM through a nested
/// `begin_execution`/`end_execution` pair; the frame stack keeps the nested
/// invocations separate.
pub struct VirtualMachine {
    pub(crate) registers: Vec<u64>,
    pub(crate) memory: VirtualMemory,
    pub(crate) cmp_flags: CompareFlags,
    pub(crate) binary: Vec<u8>,
    pub(crate) program_break: usize,
    start_address: usize,
    stack_size: usize,
    exec_frames: Vec<ExecutionFrame>,
    pub(crate) current: ExecutionFrame,
    pub(crate) stats: VmStats,
    pub(crate) builtins: Vec<BuiltinFunction>,
    pub(crate) foreign: Vec<Option<ForeignFunction>>,
    pub(crate) stdin: Box<dyn BufRead>,
    pub(crate) stdout: Box<dyn Write>,
    pub(crate) rng: SmallRng,
    #[cfg(feature = "ffi")]
    pub(crate) libraries: Vec<libloading::Library>,
}

impl std::fmt::Debug for VirtualMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualMachine")
            .field("registers", &self.registers.len())
            .field("binary", &self.binary.len())
            .field("current", &self.current)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl Default for VirtualMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualMachine {
    pub fn new() -> Self {
        Self::with_sizes(DEFAULT_REGISTER_COUNT, DEFAULT_STACK_SIZE)
    }

    pub fn with_sizes(num_registers: usize, stack_size: usize) -> Self {
        Self {
            // The root frame sits below the first real window so that
            // entering execution can unconditionally advance by
            // `MAX_CALLFRAME_REGISTER_COUNT`.
            registers: vec![0; num_registers + MAX_CALLFRAME_REGISTER_COUNT],
            memory: VirtualMemory::new(),
            cmp_flags: CompareFlags::default(),
            binary: Vec::new(),
            program_break: 0,
            start_address: 0,
            stack_size,
            exec_frames: Vec::new(),
            current: ExecutionFrame::default(),
            stats: VmStats::default(),
            builtins: make_builtin_table(),
            foreign: Vec::new(),
            stdin: Box::new(io::BufReader::new(io::stdin())),
            stdout: Box::new(io::stdout()),
            rng: SmallRng::from_entropy(),
            #[cfg(feature = "ffi")]
            libraries: Vec::new(),
        }
    }

    /// Install a program image: copy it into the static data slot, reserve
    /// stack space behind it, resolve the FFI libraries named in the trailer
    /// and reset execution state.
    pub fn load_binary(&mut self, bytes: &[u8]) -> VmResult<()> {
        let view = ProgramView::parse(bytes)?;
        self.load_program(view)
    }

    /// Install an already parsed program.
    pub fn load_program(&mut self, view: ProgramView) -> VmResult<()> {
        let aligned_size = (view.binary.len() + 15) & !15;
        self.memory.resize_static_slot(aligned_size + self.stack_size);
        self.memory
            .write(VirtualPointer::static_data(0), &view.binary)?;
        self.program_break = view.binary.len();
        self.start_address = view.start_address as usize;
        self.binary = view.binary;
        self.load_foreign_functions(&view.ffi_decls)?;
        self.reset();
        Ok(())
    }

    fn load_foreign_functions(
        &mut self,
        decls: &[scatha_asm::FfiLibDecl],
    ) -> VmResult<()> {
        self.foreign.clear();
        #[cfg(not(feature = "ffi"))]
        {
            if decls.iter().any(|lib| !lib.functions.is_empty()) {
                return Err(crate::error::FfiError::Unsupported.into());
            }
            Ok(())
        }
        #[cfg(feature = "ffi")]
        {
            crate::ffi::load_libraries(self, decls)
        }
    }

    /// Clobber the register file, clear all frames and re-establish the root
    /// frame with the stack pointer just past the program image.
    pub fn reset(&mut self) {
        let clobber = u64::from_le_bytes([REGISTER_CLOBBER_BYTE; 8]);
        self.registers.iter_mut().for_each(|reg| *reg = clobber);
        self.exec_frames.clear();
        let binary_size = (self.binary.len() + 15) & !15;
        self.current = ExecutionFrame {
            reg_base: 0,
            bottom_reg: 0,
            iptr: 0,
            stack_ptr: VirtualPointer::static_data(binary_size as u64),
        };
        self.stats = VmStats::default();
    }

    /// Run the program from its start address.
    pub fn execute(&mut self, arguments: &[u64]) -> VmResult<&[u64]> {
        self.execute_at(self.start_address, arguments)
    }

    /// Run the program from `start`.
    pub fn execute_at(
        &mut self,
        start: usize,
        arguments: &[u64],
    ) -> VmResult<&[u64]> {
        self.begin_execution(start, arguments);
        while self.running() {
            if let Err(error) = self.step_execution() {
                // Unwind the failed invocation before reporting.
                self.current = self.exec_frames.pop().unwrap_or_default();
                return Err(error);
            }
        }
        Ok(self.end_execution())
    }

    /// Push a fresh execution frame starting at `start` with `arguments`
    /// copied into its register window.
    pub fn begin_execution(&mut self, start: usize, arguments: &[u64]) {
        let last = self.current;
        self.exec_frames.push(last);
        // The currently running frame's register usage is unknown, so assume
        // the worst and skip a whole window.
        let reg_base = last.reg_base + MAX_CALLFRAME_REGISTER_COUNT;
        self.current = ExecutionFrame {
            reg_base,
            bottom_reg: reg_base,
            iptr: start,
            stack_ptr: last.stack_ptr,
        };
        self.registers[reg_base..reg_base + arguments.len()]
            .copy_from_slice(arguments);
    }

    /// `true` while the current frame has instructions left to execute.
    pub fn running(&self) -> bool {
        self.current.iptr < self.program_break
    }

    /// Execute a single instruction.
    pub fn step_execution(&mut self) -> VmResult<()> {
        self.dispatch()
    }

    /// Pop the finished frame and return its register window, whose first
    /// cells hold the return value.
    pub fn end_execution(&mut self) -> &[u64] {
        let finished = self.current;
        self.current = self.exec_frames.pop().unwrap_or_default();
        &self.registers[finished.reg_base..]
    }

    /// Redirect the VM's standard input and output streams.
    pub fn set_io(
        &mut self,
        stdin: Box<dyn BufRead>,
        stdout: Box<dyn Write>,
    ) {
        self.stdin = stdin;
        self.stdout = stdout;
    }

    pub fn allocate_memory(
        &mut self,
        size: u64,
        align: u64,
    ) -> VirtualPointer {
        self.memory.allocate(size, align)
    }

    pub fn deallocate_memory(
        &mut self,
        ptr: VirtualPointer,
        size: u64,
        align: u64,
    ) -> VmResult<()> {
        self.memory.deallocate(ptr, size, align)
    }

    /// Dereference `size` bytes behind `ptr`.
    pub fn deref_pointer(
        &self,
        ptr: VirtualPointer,
        size: usize,
    ) -> VmResult<&[u8]> {
        self.memory.dereference(ptr, size)
    }

    pub fn stats(&self) -> VmStats {
        self.stats
    }

    pub fn compare_flags(&self) -> CompareFlags {
        self.cmp_flags
    }

    /// Offset of the instruction pointer within the binary.
    pub fn instruction_pointer_offset(&self) -> usize {
        self.current.iptr
    }

    pub fn set_instruction_pointer_offset(&mut self, offset: usize) {
        self.current.iptr = offset;
    }
}
