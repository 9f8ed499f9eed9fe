use std::io::Write;

use tracing::{debug, error, info, trace, warn};

use crate::alu::{self, AluOutput};
use crate::error::Error;
use crate::flags::Flags;
use crate::memory::Memory;
use crate::opcode::{Instruction, Opcode, decode};
use crate::registers::RegisterFile;

/// Lifecycle of an engine. `Halted` is reached only by executing HLT.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    Ready,
    Running,
    Halted,
}

/// What to do when the fetched byte is not in the opcode table.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum UnknownOpcodePolicy {
    /// Report the byte and its address as an error and stop stepping.
    #[default]
    Abort,
    /// Log a warning and skip the byte plus the operand count its top two
    /// bits declare.
    Skip,
}

/// Run configuration for an engine.
#[derive(Clone, Debug)]
pub struct CpuConfig {
    /// Maximum instructions to execute before failing with
    /// `StepLimitExceeded`. `None` runs until HLT.
    pub step_limit: Option<usize>,
    pub unknown_opcode: UnknownOpcodePolicy,
    /// Initial value of the stack pointer register (R6).
    pub stack_pointer: u8,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            step_limit: None,
            unknown_opcode: UnknownOpcodePolicy::Abort,
            stack_pointer: 0,
        }
    }
}

/// Where the PC goes after an instruction.
enum Flow {
    /// Fall through to the next instruction.
    Next,
    Jump(u8),
    Halt,
}

/// The fetch-decode-execute engine.
///
/// Owns its memory, registers, PC and flags outright, so independent
/// instances never share state. PRN output goes to `out`, one decimal value
/// per line.
pub struct Cpu<W: Write> {
    memory: Memory,
    registers: RegisterFile,
    pc: usize,
    flags: Flags,
    state: State,
    steps: usize,
    config: CpuConfig,
    out: W,
}

impl<W: Write> Cpu<W> {
    pub fn new(out: W) -> Self {
        Self::with_config(CpuConfig::default(), out)
    }

    pub fn with_config(config: CpuConfig, out: W) -> Self {
        let mut registers = RegisterFile::new();
        registers.set_sp(config.stack_pointer);
        Self {
            memory: Memory::new(),
            registers,
            pc: 0,
            flags: Flags::new(),
            state: State::Ready,
            steps: 0,
            config,
            out,
        }
    }

    /// Install `program` at address 0 and reset PC, flags and the step
    /// counter. Registers are left as they are.
    pub fn load(&mut self, program: &[u8]) -> Result<(), Error> {
        self.memory.load(program)?;
        self.pc = 0;
        self.flags = Flags::new();
        self.state = State::Ready;
        self.steps = 0;
        debug!(bytes = program.len(), "program loaded");
        Ok(())
    }

    pub fn read(&self, address: usize) -> Result<u8, Error> {
        self.memory.read(address)
    }

    pub fn write(&mut self, address: usize, value: u8) -> Result<(), Error> {
        self.memory.write(address, value)
    }

    pub fn register(&self, index: usize) -> Result<u8, Error> {
        self.registers.get(index)
    }

    pub fn set_register(&mut self, index: usize, value: u8) -> Result<(), Error> {
        self.registers.set(index, value)
    }

    pub fn registers(&self) -> &RegisterFile {
        &self.registers
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Instructions executed since the last load.
    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn config(&self) -> &CpuConfig {
        &self.config
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    pub fn into_output(self) -> W {
        self.out
    }

    /// Run until HLT. Returns the number of instructions executed.
    pub fn run(&mut self) -> Result<usize, Error> {
        while self.step()? {}
        Ok(self.steps)
    }

    /// Execute one instruction. Returns false once the engine has halted.
    pub fn step(&mut self) -> Result<bool, Error> {
        if self.state == State::Halted {
            return Ok(false);
        }
        self.state = State::Running;

        if let Some(limit) = self.config.step_limit {
            if self.steps >= limit {
                return Err(Error::StepLimitExceeded(limit));
            }
        }

        let address = self.pc;
        let inst = decode(self.memory.read(address)?);

        if let Opcode::Unknown(opcode) = inst.opcode {
            return self.unknown_opcode(inst, opcode, address);
        }

        let mut operands = [0u8; 2];
        for (i, slot) in operands.iter_mut().enumerate().take(inst.operand_count) {
            *slot = self.memory.read(address + 1 + i)?;
        }
        let [a, b] = operands;

        trace!(
            pc = address,
            op = inst.opcode.mnemonic(),
            a,
            b,
            sets_pc = inst.sets_pc,
            "execute"
        );
        self.steps += 1;

        let flow = if inst.is_alu {
            self.execute_alu(inst.opcode, a, b)?;
            Flow::Next
        } else {
            self.execute_control(inst, a, b)?
        };
        debug_assert!(
            inst.sets_pc || !matches!(flow, Flow::Jump(_)),
            "{} jumped without the PC-setting bit",
            inst.opcode.mnemonic()
        );

        match flow {
            Flow::Next => self.pc = address + inst.size(),
            Flow::Jump(target) => self.pc = target as usize,
            Flow::Halt => {
                self.state = State::Halted;
                info!(steps = self.steps, "halted");
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn unknown_opcode(
        &mut self,
        inst: Instruction,
        opcode: u8,
        address: usize,
    ) -> Result<bool, Error> {
        match self.config.unknown_opcode {
            UnknownOpcodePolicy::Abort => {
                error!(opcode, address, "unknown opcode");
                Err(Error::UnknownOpcode { opcode, address })
            }
            UnknownOpcodePolicy::Skip => {
                warn!(opcode, address, "skipping unknown opcode");
                self.steps += 1;
                self.pc = address + inst.size();
                Ok(true)
            }
        }
    }

    /// Resolve both register operands and hand the values to the ALU.
    fn execute_alu(&mut self, op: Opcode, reg_a: u8, reg_b: u8) -> Result<(), Error> {
        let a = self.registers.get(reg_a as usize)?;
        let b = self.registers.get(reg_b as usize)?;
        match alu::execute(op, a, b)? {
            AluOutput::Value(value) => self.registers.set(reg_a as usize, value)?,
            AluOutput::Flags(flags) => self.flags = flags,
        }
        Ok(())
    }

    fn execute_control(&mut self, inst: Instruction, a: u8, b: u8) -> Result<Flow, Error> {
        let reg = a as usize;
        let flow = match inst.opcode {
            Opcode::Hlt => Flow::Halt,
            Opcode::Ldi => {
                self.registers.set(reg, b)?;
                Flow::Next
            }
            Opcode::Prn => {
                let value = self.registers.get(reg)?;
                writeln!(self.out, "{value}")?;
                Flow::Next
            }
            Opcode::Push => {
                let value = self.registers.get(reg)?;
                self.push(value)?;
                Flow::Next
            }
            Opcode::Pop => {
                // Validate the destination before SP moves.
                self.registers.get(reg)?;
                let value = self.pop()?;
                self.registers.set(reg, value)?;
                Flow::Next
            }
            Opcode::Call => {
                let target = self.registers.get(reg)?;
                let ret = self.pc + inst.size();
                let ret = u8::try_from(ret).map_err(|_| Error::AddressOutOfRange(ret))?;
                self.push(ret)?;
                Flow::Jump(target)
            }
            Opcode::Ret => Flow::Jump(self.pop()?),
            Opcode::Jmp => Flow::Jump(self.registers.get(reg)?),
            Opcode::Jeq => self.branch_if(self.flags.equal(), reg)?,
            Opcode::Jne => self.branch_if(!self.flags.equal(), reg)?,
            Opcode::Add | Opcode::Mul | Opcode::Cmp | Opcode::Unknown(_) => {
                return Err(Error::UnsupportedAluOp(inst.opcode));
            }
        };
        Ok(flow)
    }

    fn branch_if(&self, taken: bool, reg: usize) -> Result<Flow, Error> {
        if taken {
            Ok(Flow::Jump(self.registers.get(reg)?))
        } else {
            Ok(Flow::Next)
        }
    }

    /// Decrement SP, then store at the new top.
    fn push(&mut self, value: u8) -> Result<(), Error> {
        let sp = self.registers.sp().wrapping_sub(1);
        self.registers.set_sp(sp);
        self.memory.write(sp as usize, value)
    }

    /// Load from the top, then increment SP.
    fn pop(&mut self) -> Result<u8, Error> {
        let sp = self.registers.sp();
        let value = self.memory.read(sp as usize)?;
        self.registers.set_sp(sp.wrapping_add(1));
        Ok(value)
    }

    /// Render PC, the three bytes at PC and every register in hex.
    ///
    /// Bytes beyond the end of memory show as `--`. Does not touch engine
    /// state.
    pub fn trace(&self) -> String {
        let byte = |addr: usize| match self.memory.peek(addr) {
            Some(b) => format!("{b:02X}"),
            None => "--".to_string(),
        };
        let regs: String = self
            .registers
            .as_array()
            .iter()
            .map(|r| format!(" {r:02X}"))
            .collect();
        format!(
            "TRACE: {:02X} | {} {} {} |{regs}",
            self.pc,
            byte(self.pc),
            byte(self.pc + 1),
            byte(self.pc + 2)
        )
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const HLT: u8 = 0b0000_0001;
    pub(crate) const LDI: u8 = 0b1000_0010;
    pub(crate) const PRN: u8 = 0b0100_0111;
    pub(crate) const ADD: u8 = 0b1010_0000;
    pub(crate) const MUL: u8 = 0b1010_0010;
    pub(crate) const CMP: u8 = 0b1010_0111;
    pub(crate) const PUSH: u8 = 0b0100_0101;
    pub(crate) const POP: u8 = 0b0100_0110;
    pub(crate) const CALL: u8 = 0b0101_0000;
    pub(crate) const RET: u8 = 0b0001_0001;
    pub(crate) const JMP: u8 = 0b0101_0100;
    pub(crate) const JEQ: u8 = 0b0101_0101;
    pub(crate) const JNE: u8 = 0b0101_0110;

    fn cpu_with(program: &[u8]) -> Cpu<Vec<u8>> {
        let mut cpu = Cpu::new(Vec::new());
        cpu.load(program).unwrap();
        cpu
    }

    fn run_ok(program: &[u8]) -> (Cpu<Vec<u8>>, String) {
        let mut cpu = cpu_with(program);
        cpu.run().unwrap();
        let out = String::from_utf8(cpu.output().clone()).unwrap();
        (cpu, out)
    }

    #[test]
    fn print8() {
        let (cpu, out) = run_ok(&[LDI, 0, 8, PRN, 0, HLT]);
        assert_eq!(out, "8\n");
        assert_eq!(cpu.state(), State::Halted);
        assert_eq!(cpu.steps(), 3);
        assert_eq!(cpu.pc(), 5); // stays on the HLT
    }

    #[test]
    fn mult_prints_72() {
        let (cpu, out) = run_ok(&[
            LDI, 0, 8, // R0 = 8
            LDI, 1, 9, // R1 = 9
            MUL, 0, 1, // R0 *= R1
            PRN, 0, //
            HLT,
        ]);
        assert_eq!(out, "72\n");
        assert_eq!(cpu.state(), State::Halted);
    }

    #[test]
    fn add_wraps_in_register() {
        let (cpu, _) = run_ok(&[LDI, 2, 200, LDI, 3, 100, ADD, 2, 3, HLT]);
        assert_eq!(cpu.register(2).unwrap(), 44);
        assert_eq!(cpu.register(3).unwrap(), 100);
    }

    #[test]
    fn cmp_uses_register_contents_not_indices() {
        // R0 = 1, R1 = 0: indices say Less, contents say Greater.
        let (cpu, _) = run_ok(&[LDI, 0, 1, LDI, 1, 0, CMP, 0, 1, HLT]);
        assert!(cpu.flags().greater());
        assert!(!cpu.flags().equal());
    }

    #[test]
    fn flags_persist_until_next_cmp() {
        let (cpu, _) = run_ok(&[LDI, 0, 4, CMP, 0, 0, LDI, 0, 9, ADD, 0, 0, HLT]);
        assert!(cpu.flags().equal());
    }

    #[test]
    fn push_three_pop_three_reverses() {
        let (cpu, _) = run_ok(&[
            LDI, 0, 1, PUSH, 0, //
            LDI, 0, 2, PUSH, 0, //
            LDI, 0, 3, PUSH, 0, //
            POP, 0, POP, 1, POP, 2, //
            HLT,
        ]);
        assert_eq!(cpu.register(0).unwrap(), 3);
        assert_eq!(cpu.register(1).unwrap(), 2);
        assert_eq!(cpu.register(2).unwrap(), 1);
        assert_eq!(cpu.registers().sp(), 0);
    }

    #[test]
    fn first_push_from_zero_sp_writes_last_cell() {
        let (cpu, _) = run_ok(&[LDI, 0, 0xAB, PUSH, 0, HLT]);
        assert_eq!(cpu.registers().sp(), 255);
        assert_eq!(cpu.read(255).unwrap(), 0xAB);
    }

    #[test]
    fn configured_stack_pointer() {
        let config = CpuConfig {
            stack_pointer: 0xF4,
            ..Default::default()
        };
        let mut cpu = Cpu::with_config(config, Vec::new());
        cpu.load(&[LDI, 0, 7, PUSH, 0, HLT]).unwrap();
        cpu.run().unwrap();
        assert_eq!(cpu.registers().sp(), 0xF3);
        assert_eq!(cpu.read(0xF3).unwrap(), 7);
    }

    #[test]
    fn call_then_ret_resumes_after_call() {
        let mut program = vec![
            LDI, 1, 10, // 0: R1 = 10
            CALL, 1, // 3: call 10
            PRN, 0, // 5
            HLT, // 7
            HLT, HLT, // 8, 9
        ];
        program.extend_from_slice(&[
            LDI, 0, 42, // 10: R0 = 42
            RET, // 13
        ]);
        let (cpu, out) = run_ok(&program);
        assert_eq!(out, "42\n");
        assert_eq!(cpu.registers().sp(), 0);
        // Return address 5 was written to the slot below the initial SP.
        assert_eq!(cpu.read(255).unwrap(), 5);
    }

    #[test]
    fn nested_calls() {
        let program = [
            LDI, 1, 9, // 0: R1 = 9
            CALL, 1, // 3: outer call
            PRN, 0, // 5
            HLT, // 7
            HLT, // 8
            LDI, 2, 16, // 9: R2 = 16
            CALL, 2, // 12: inner call
            RET, // 14
            HLT, // 15
            LDI, 0, 21, // 16
            RET, // 19
        ];
        let (cpu, out) = run_ok(&program);
        assert_eq!(out, "21\n");
        assert_eq!(cpu.registers().sp(), 0);
        assert_eq!(cpu.read(254).unwrap(), 14);
    }

    fn branch_program(jump: u8) -> Vec<u8> {
        vec![
            LDI, 0, 5, // 0
            LDI, 1, 5, // 3
            LDI, 2, 17, // 6: R2 = target
            CMP, 0, 1, // 9
            jump, 2, // 12
            PRN, 0, // 14: fall-through path
            HLT, // 16
            LDI, 3, 99, // 17: taken path
            PRN, 3, // 20
            HLT, // 22
        ]
    }

    #[test]
    fn jeq_taken_on_equal() {
        let (_, out) = run_ok(&branch_program(JEQ));
        assert_eq!(out, "99\n");
    }

    #[test]
    fn jne_not_taken_on_equal() {
        let (_, out) = run_ok(&branch_program(JNE));
        assert_eq!(out, "5\n");
    }

    #[test]
    fn jeq_sets_pc_exactly() {
        let mut cpu = cpu_with(&branch_program(JEQ));
        for _ in 0..4 {
            cpu.step().unwrap();
        }
        assert_eq!(cpu.pc(), 12);
        cpu.step().unwrap();
        assert_eq!(cpu.pc(), 17);
    }

    #[test]
    fn jne_advances_by_two_when_not_taken() {
        let mut cpu = cpu_with(&branch_program(JNE));
        for _ in 0..5 {
            cpu.step().unwrap();
        }
        assert_eq!(cpu.pc(), 14);
    }

    #[test]
    fn jmp_is_unconditional() {
        let (_, out) = run_ok(&[LDI, 0, 8, JMP, 0, HLT, HLT, HLT, LDI, 1, 3, PRN, 1, HLT]);
        assert_eq!(out, "3\n");
    }

    #[test]
    fn state_transitions() {
        let mut cpu = cpu_with(&[LDI, 0, 1, HLT]);
        assert_eq!(cpu.state(), State::Ready);
        assert!(cpu.step().unwrap());
        assert_eq!(cpu.state(), State::Running);
        assert!(!cpu.step().unwrap());
        assert_eq!(cpu.state(), State::Halted);
        assert!(!cpu.step().unwrap());
        assert_eq!(cpu.steps(), 2);
    }

    #[test]
    fn unknown_opcode_aborts_by_default() {
        let mut cpu = cpu_with(&[LDI, 0, 1, 0xFF]);
        let err = cpu.run().unwrap_err();
        assert!(matches!(
            err,
            Error::UnknownOpcode {
                opcode: 0xFF,
                address: 3
            }
        ));
        assert_eq!(cpu.state(), State::Running);
    }

    #[test]
    fn empty_memory_is_unknown_opcode_zero() {
        let mut cpu = cpu_with(&[]);
        assert!(matches!(
            cpu.run(),
            Err(Error::UnknownOpcode {
                opcode: 0,
                address: 0
            })
        ));
    }

    #[test]
    fn unknown_opcode_skip_policy() {
        let config = CpuConfig {
            unknown_opcode: UnknownOpcodePolicy::Skip,
            ..Default::default()
        };
        let mut cpu = Cpu::with_config(config, Vec::new());
        // 0b0100_1111 is unknown and declares one operand byte.
        cpu.load(&[0b0000_1111, 0b0100_1111, 0xEE, LDI, 0, 7, PRN, 0, HLT])
            .unwrap();
        cpu.run().unwrap();
        assert_eq!(cpu.output().as_slice(), b"7\n");
        assert_eq!(cpu.steps(), 5);
    }

    #[test]
    fn step_limit_stops_infinite_loop() {
        let config = CpuConfig {
            step_limit: Some(10),
            ..Default::default()
        };
        let mut cpu = Cpu::with_config(config, Vec::new());
        cpu.load(&[LDI, 0, 3, JMP, 0]).unwrap();
        assert!(matches!(cpu.run(), Err(Error::StepLimitExceeded(10))));
        assert_eq!(cpu.steps(), 10);
    }

    #[test]
    fn fetch_past_memory_end_is_reported() {
        let mut cpu = cpu_with(&[LDI, 0, 254, JMP, 0]);
        cpu.write(254, LDI).unwrap();
        assert!(matches!(cpu.run(), Err(Error::AddressOutOfRange(256))));
    }

    #[test]
    fn bad_register_operand_is_reported() {
        let mut cpu = cpu_with(&[LDI, 9, 1, HLT]);
        assert!(matches!(cpu.run(), Err(Error::RegisterOutOfRange(9))));
    }

    #[test]
    fn pop_into_bad_register_leaves_sp_alone() {
        let mut cpu = cpu_with(&[LDI, 0, 5, PUSH, 0, POP, 9, HLT]);
        assert!(matches!(cpu.run(), Err(Error::RegisterOutOfRange(9))));
        assert_eq!(cpu.registers().sp(), 255);
        assert_eq!(cpu.read(255).unwrap(), 5);
        assert_eq!(cpu.pc(), 5);
    }

    #[test]
    fn call_at_254_has_no_room_for_return_address() {
        // R1 = 0 so a successful call would loop back to the start.
        let mut cpu = cpu_with(&[LDI, 0, 254, JMP, 0]);
        cpu.write(254, CALL).unwrap();
        cpu.write(255, 1).unwrap();
        assert!(matches!(cpu.run(), Err(Error::AddressOutOfRange(256))));
        assert_eq!(cpu.registers().sp(), 0);
        assert_eq!(cpu.pc(), 254);
    }

    #[test]
    fn call_at_253_returns_to_255() {
        let mut cpu = cpu_with(&[
            LDI, 0, 253, // 0: R0 = 253
            LDI, 1, 16, // 3: R1 = 16 (subroutine)
            LDI, 6, 200, // 6: SP = 200, clear of the code at the top
            JMP, 0, // 9
            HLT, HLT, HLT, HLT, HLT, // 11..=15
            LDI, 2, 77, // 16: R2 = 77
            RET, // 19
        ]);
        cpu.write(253, CALL).unwrap();
        cpu.write(254, 1).unwrap();
        cpu.write(255, HLT).unwrap();
        cpu.run().unwrap();
        assert_eq!(cpu.state(), State::Halted);
        assert_eq!(cpu.pc(), 255);
        assert_eq!(cpu.register(2).unwrap(), 77);
        assert_eq!(cpu.read(199).unwrap(), 255);
        assert_eq!(cpu.registers().sp(), 200);
    }

    #[test]
    fn trace_format() {
        let mut cpu = cpu_with(&[LDI, 0, 8, HLT]);
        assert_eq!(
            cpu.trace(),
            "TRACE: 00 | 82 00 08 | 00 00 00 00 00 00 00 00"
        );
        cpu.step().unwrap();
        assert_eq!(
            cpu.trace(),
            "TRACE: 03 | 01 00 00 | 08 00 00 00 00 00 00 00"
        );
    }

    #[test]
    fn trace_past_end_and_is_pure() {
        let mut cpu = cpu_with(&[]);
        cpu.write(0, LDI).unwrap();
        cpu.write(1, 0).unwrap();
        cpu.write(2, 254).unwrap();
        cpu.write(3, JMP).unwrap();
        cpu.write(4, 0).unwrap();
        cpu.step().unwrap();
        cpu.step().unwrap();
        let before = cpu.memory().as_slice().to_vec();
        assert_eq!(
            cpu.trace(),
            "TRACE: FE | 00 00 -- | FE 00 00 00 00 00 00 00"
        );
        assert_eq!(cpu.memory().as_slice(), before.as_slice());
        assert_eq!(cpu.pc(), 254);
    }

    #[test]
    fn load_resets_execution_state() {
        let mut cpu = cpu_with(&[LDI, 0, 1, HLT]);
        cpu.run().unwrap();
        cpu.load(&[LDI, 1, 2, PRN, 1, HLT]).unwrap();
        assert_eq!(cpu.state(), State::Ready);
        assert_eq!(cpu.pc(), 0);
        cpu.run().unwrap();
        assert_eq!(cpu.output().as_slice(), b"2\n");
        // Registers survive the reload.
        assert_eq!(cpu.register(0).unwrap(), 1);
    }

    #[test]
    fn instances_are_isolated() {
        let (a, _) = run_ok(&[LDI, 0, 1, HLT]);
        let (b, _) = run_ok(&[LDI, 0, 2, HLT]);
        assert_eq!(a.register(0).unwrap(), 1);
        assert_eq!(b.register(0).unwrap(), 2);
    }
}
