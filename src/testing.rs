//! Simulated hardware for tests: an SWD target and a JTAG TAP driven at the pin level, a fake
//! GPIO bank the models can be wired to, a fake offload co-processor and a counting delay.
use alloc::collections::VecDeque;
use alloc::rc::Rc;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::time::Duration;

use crate::cable::pru::{Coprocessor, PruCommand, RESULT_WORD, SRST_MASK};
use crate::cable::Bitbang;
use crate::delay::DelayStrategy;
use crate::error::Error;
use crate::pins::{GpioController, PinWrite, FUNCTION_OUTPUT};
use crate::statemachine::TapState;
use crate::swd::{parity_u32, Ack, Port, CMD_A32, CMD_APNDP, CMD_PARITY, CMD_PARK, CMD_RNW, CMD_START, CMD_STOP};

/// Consecutive high bits a target treats as a line reset.
const LINE_RESET_ONES: u32 = 50;

/// Counts what a driver asks of its delay strategy.
#[derive(Debug, Default, Clone)]
pub struct CountingDelay {
    pub calls: u64,
    pub iterations: u64,
    pub slept_us: u64,
}

impl DelayStrategy for CountingDelay {
    fn delay(&mut self, iterations: u32) {
        self.calls += 1;
        self.iterations += u64::from(iterations);
    }

    fn sleep_us(&mut self, us: u32) {
        self.slept_us += u64::from(us);
    }
}

/// Register file and scripted responses of a simulated debug port.
#[derive(Debug, Clone)]
pub struct TargetRegisters {
    pub idcode: u32,
    dp: [u32; 4],
    ap: [u32; 4],
    acks: VecDeque<Ack>,
    /// Flip the parity bit of every read.
    pub corrupt_read_parity: bool,
    /// Requests answered, whatever the acknowledgement.
    pub transactions: usize,
    pub write_parity_errors: usize,
}

impl TargetRegisters {
    pub fn new(idcode: u32) -> Self {
        Self {
            idcode,
            dp: [0; 4],
            ap: [0; 4],
            acks: VecDeque::new(),
            corrupt_read_parity: false,
            transactions: 0,
            write_parity_errors: 0,
        }
    }

    /// Answer the next request with `ack` instead of OK.
    pub fn queue_ack(&mut self, ack: Ack) {
        self.acks.push_back(ack);
    }

    pub fn register(&self, port: Port, address: u8) -> u32 {
        let index = usize::from(address >> 2) & 3;
        match port {
            Port::Debug if index == 0 => self.idcode,
            Port::Debug => self.dp[index],
            Port::Access => self.ap[index],
        }
    }

    fn index(request: u8) -> usize {
        usize::from((request & CMD_A32) >> 3)
    }

    /// Acknowledgement bits for `request`.
    pub fn respond(&mut self, _request: u8) -> u8 {
        self.transactions += 1;
        self.acks.pop_front().unwrap_or(Ack::Ok).bits()
    }

    /// Data and parity bit for a read.
    pub fn read(&mut self, request: u8) -> (u32, bool) {
        let port = if request & CMD_APNDP != 0 { Port::Access } else { Port::Debug };
        let value = self.register(port, (Self::index(request) as u8) << 2);
        (value, parity_u32(value) ^ self.corrupt_read_parity)
    }

    pub fn write(&mut self, request: u8, value: u32, parity: bool) {
        if parity != parity_u32(value) {
            self.write_parity_errors += 1;
            return;
        }
        let index = Self::index(request);
        if request & CMD_APNDP != 0 {
            self.ap[index] = value;
        } else {
            self.dp[index] = value;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SwdPhase {
    Idle,
    Request { bits: u8, count: u8 },
    Turnaround { request: u8 },
    Ack { request: u8, ack: u8, count: u8 },
    ReadData { value: u64, count: u8 },
    ReadTurnaround,
    WriteTurnaround { request: u8 },
    WriteData { request: u8, value: u64, count: u8 },
}

/// An SWD debug port simulated one clock edge at a time.
#[derive(Debug, Clone)]
pub struct SwdTarget {
    registers: TargetRegisters,
    phase: SwdPhase,
    clock: bool,
    host_drives: bool,
    host_level: bool,
    ones: u32,
    line_resets: usize,
    rising_edges: u64,
    host_bits: Vec<bool>,
    silent: bool,
    srst: bool,
    slept_us: u64,
}

impl SwdTarget {
    pub fn new(idcode: u32) -> Self {
        Self {
            registers: TargetRegisters::new(idcode),
            phase: SwdPhase::Idle,
            clock: false,
            host_drives: true,
            host_level: false,
            ones: 0,
            line_resets: 0,
            rising_edges: 0,
            host_bits: Vec::new(),
            silent: false,
            srst: false,
            slept_us: 0,
        }
    }

    pub fn registers(&self) -> &TargetRegisters {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut TargetRegisters {
        &mut self.registers
    }

    /// Stop answering requests, as if nothing were connected.
    pub fn set_silent(&mut self, silent: bool) {
        self.silent = silent;
    }

    pub fn rising_edges(&self) -> u64 {
        self.rising_edges
    }

    /// Every bit the host drove, one per rising edge.
    pub fn host_bits(&self) -> &[bool] {
        &self.host_bits
    }

    pub fn line_resets(&self) -> usize {
        self.line_resets
    }

    pub fn srst_asserted(&self) -> bool {
        self.srst
    }

    pub fn slept_us(&self) -> u64 {
        self.slept_us
    }

    /// Level the target puts on SWDIO.  An undriven line floats high.
    pub fn swdio(&self) -> bool {
        match self.phase {
            SwdPhase::Ack { ack, count, .. } => (ack >> count) & 1 == 1,
            SwdPhase::ReadData { value, count } => (value >> count) & 1 == 1,
            _ => true,
        }
    }

    /// Update SWCLK, with `host` the level the host drives on SWDIO, if it drives it.
    pub fn clock(&mut self, clock: bool, host: Option<bool>) {
        if clock && !self.clock {
            self.rising_edge(host);
        }
        self.clock = clock;
    }

    fn decode(&self, request: u8) -> SwdPhase {
        let framed = request & CMD_START != 0 && request & CMD_STOP == 0 && request & CMD_PARK != 0;
        let parity = ((request >> 1) & 0xf).count_ones() & 1 == 1;
        if self.silent || !framed || parity != (request & CMD_PARITY != 0) {
            SwdPhase::Idle
        } else {
            SwdPhase::Turnaround { request }
        }
    }

    fn rising_edge(&mut self, host: Option<bool>) {
        self.rising_edges += 1;

        if let Some(bit) = host {
            self.host_bits.push(bit);
            if bit {
                self.ones += 1;
            } else {
                if self.ones >= LINE_RESET_ONES {
                    self.line_resets += 1;
                }
                self.ones = 0;
            }
            if self.ones >= LINE_RESET_ONES {
                self.phase = SwdPhase::Idle;
                return;
            }
        }

        let bit = host.unwrap_or_else(|| self.swdio());
        let phase = self.phase;
        self.phase = match phase {
            SwdPhase::Idle if host == Some(true) => SwdPhase::Request { bits: 1, count: 1 },
            SwdPhase::Idle => SwdPhase::Idle,
            SwdPhase::Request { bits, count } => {
                let bits = bits | (bit as u8) << count;
                if count + 1 < 8 {
                    SwdPhase::Request { bits, count: count + 1 }
                } else {
                    self.decode(bits)
                }
            }
            SwdPhase::Turnaround { request } => {
                let ack = self.registers.respond(request);
                SwdPhase::Ack { request, ack, count: 0 }
            }
            SwdPhase::Ack { request, ack, count } if count + 1 < 3 => SwdPhase::Ack { request, ack, count: count + 1 },
            SwdPhase::Ack { request, ack, .. } => {
                if ack != Ack::OK {
                    SwdPhase::Idle
                } else if request & CMD_RNW != 0 {
                    let (data, parity) = self.registers.read(request);
                    SwdPhase::ReadData { value: u64::from(data) | u64::from(parity) << 32, count: 0 }
                } else {
                    SwdPhase::WriteTurnaround { request }
                }
            }
            SwdPhase::ReadData { value, count } if count + 1 < 33 => SwdPhase::ReadData { value, count: count + 1 },
            SwdPhase::ReadData { .. } => SwdPhase::ReadTurnaround,
            SwdPhase::ReadTurnaround => SwdPhase::Idle,
            SwdPhase::WriteTurnaround { request } => SwdPhase::WriteData { request, value: 0, count: 0 },
            SwdPhase::WriteData { request, value, count } => {
                let value = value | u64::from(bit) << count;
                if count + 1 < 33 {
                    SwdPhase::WriteData { request, value, count: count + 1 }
                } else {
                    self.registers.write(request, value as u32, (value >> 32) & 1 == 1);
                    SwdPhase::Idle
                }
            }
        };
    }
}

impl Bitbang for SwdTarget {
    fn write(&mut self, clock: bool, _tms: bool, data: bool) -> Result<(), Error> {
        self.host_level = data;
        let host = self.host_drives.then_some(data);
        self.clock(clock, host);
        Ok(())
    }

    fn read(&mut self) -> Result<bool, Error> {
        Ok(false)
    }

    fn reset(&mut self, _trst: bool, srst: bool) -> Result<(), Error> {
        self.srst = srst;
        Ok(())
    }

    fn srst(&mut self, assert: bool) -> Result<(), Error> {
        self.srst = assert;
        Ok(())
    }

    fn swdio_read(&mut self) -> Result<bool, Error> {
        Ok(if self.host_drives { self.host_level } else { self.swdio() })
    }

    fn swdio_drive(&mut self, output: bool) -> Result<(), Error> {
        self.host_drives = output;
        Ok(())
    }

    fn sleep_us(&mut self, us: u32) {
        self.slept_us += u64::from(us);
    }
}

pub const IR_LEN: u32 = 4;
pub const IDCODE_INSTRUCTION: u8 = 0b1110;
pub const BYPASS_INSTRUCTION: u8 = 0b1111;

/// A single TAP with a 4-bit instruction register, IDCODE and BYPASS.
#[derive(Debug, Clone)]
pub struct JtagTap {
    state: TapState,
    idcode: u32,
    ir: u8,
    ir_shift: u8,
    dr: u64,
    dr_len: u32,
    tck: bool,
    rising_edges: u64,
    trst: bool,
    srst: bool,
    led: bool,
    slept_us: u64,
}

impl JtagTap {
    pub fn new(idcode: u32) -> Self {
        Self {
            state: TapState::Reset,
            idcode,
            ir: IDCODE_INSTRUCTION,
            ir_shift: 0,
            dr: 0,
            dr_len: 1,
            tck: false,
            rising_edges: 0,
            trst: false,
            srst: false,
            led: false,
            slept_us: 0,
        }
    }

    pub fn state(&self) -> TapState {
        self.state
    }

    pub fn instruction(&self) -> u8 {
        self.ir
    }

    pub fn rising_edges(&self) -> u64 {
        self.rising_edges
    }

    pub fn srst_asserted(&self) -> bool {
        self.srst
    }

    pub fn led(&self) -> bool {
        self.led
    }

    pub fn slept_us(&self) -> u64 {
        self.slept_us
    }

    pub fn tdo(&self) -> bool {
        match self.state {
            TapState::ShiftDR => self.dr & 1 == 1,
            TapState::ShiftIR => self.ir_shift & 1 == 1,
            _ => false,
        }
    }

    pub fn clock(&mut self, tck: bool, tms: bool, tdi: bool) {
        if tck && !self.tck && !self.trst {
            self.rising_edge(tms, tdi);
        }
        self.tck = tck;
    }

    fn rising_edge(&mut self, tms: bool, tdi: bool) {
        self.rising_edges += 1;
        match self.state {
            TapState::CaptureDR if self.ir == IDCODE_INSTRUCTION => {
                self.dr = self.idcode.into();
                self.dr_len = 32;
            }
            TapState::CaptureDR => {
                self.dr = 0;
                self.dr_len = 1;
            }
            TapState::ShiftDR => {
                self.dr = (self.dr >> 1) | u64::from(tdi) << (self.dr_len - 1);
            }
            TapState::CaptureIR => self.ir_shift = 0b0001,
            TapState::ShiftIR => {
                self.ir_shift = (self.ir_shift >> 1) | u8::from(tdi) << (IR_LEN - 1);
            }
            TapState::UpdateIR => self.ir = self.ir_shift,
            _ => {}
        }

        self.state = self.state.next(tms);
        if self.state == TapState::Reset {
            self.ir = IDCODE_INSTRUCTION;
        }
    }
}

impl Bitbang for JtagTap {
    fn write(&mut self, clock: bool, tms: bool, data: bool) -> Result<(), Error> {
        self.clock(clock, tms, data);
        Ok(())
    }

    fn read(&mut self) -> Result<bool, Error> {
        Ok(self.tdo())
    }

    fn reset(&mut self, trst: bool, srst: bool) -> Result<(), Error> {
        if trst {
            self.state = TapState::Reset;
            self.ir = IDCODE_INSTRUCTION;
        }
        self.trst = trst;
        self.srst = srst;
        Ok(())
    }

    fn srst(&mut self, assert: bool) -> Result<(), Error> {
        self.srst = assert;
        Ok(())
    }

    fn swdio_read(&mut self) -> Result<bool, Error> {
        Ok(false)
    }

    fn swdio_drive(&mut self, _output: bool) -> Result<(), Error> {
        Ok(())
    }

    fn blink(&mut self, on: bool) -> Result<(), Error> {
        self.led = on;
        Ok(())
    }

    fn sleep_us(&mut self, us: u32) {
        self.slept_us += u64::from(us);
    }
}

const FAKE_GPIO_PINS: usize = 54;

#[derive(Debug, Clone, Copy)]
struct JtagWiring {
    tck: u8,
    tms: u8,
    tdi: u8,
    tdo: u8,
}

struct GpioState {
    functions: [u8; FAKE_GPIO_PINS],
    driven: u64,
    inputs: u64,
    writes: Vec<PinWrite>,
    swd: Option<(u8, u8, SwdTarget)>,
    jtag: Option<(JtagWiring, JtagTap)>,
}

impl Default for GpioState {
    fn default() -> Self {
        Self {
            functions: [0; FAKE_GPIO_PINS],
            driven: 0,
            inputs: 0,
            writes: Vec::new(),
            swd: None,
            jtag: None,
        }
    }
}

/// A GPIO bank in memory.  Clones share the same bank, so a test can keep a handle while a
/// driver owns another.
#[derive(Clone, Default)]
pub struct FakeGpio {
    state: Rc<RefCell<GpioState>>,
}

fn bit(levels: u64, pin: u8) -> bool {
    (levels >> pin) & 1 == 1
}

impl FakeGpio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_initial_function(&self, pin: u8, function: u8) {
        self.state.borrow_mut().functions[usize::from(pin)] = function;
    }

    /// Level an external device drives onto an input pin.
    pub fn set_input_level(&self, pin: u8, high: bool) {
        let mut st = self.state.borrow_mut();
        st.inputs = PinWrite::new().level(Some(pin), high).apply(st.inputs);
    }

    pub fn writes(&self) -> Vec<PinWrite> {
        self.state.borrow().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.state.borrow_mut().writes.clear();
    }

    /// Wire an SWD target to `swclk` and `swdio`.
    pub fn attach_swd(&self, swclk: u8, swdio: u8, target: SwdTarget) {
        self.state.borrow_mut().swd = Some((swclk, swdio, target));
    }

    pub fn attach_jtag(&self, tck: u8, tms: u8, tdi: u8, tdo: u8, tap: JtagTap) {
        self.state.borrow_mut().jtag = Some((JtagWiring { tck, tms, tdi, tdo }, tap));
    }

    /// Inspect the attached SWD target.  Panics if there isn't one.
    pub fn with_swd<R>(&self, f: impl FnOnce(&mut SwdTarget) -> R) -> R {
        let mut st = self.state.borrow_mut();
        let (_, _, target) = st.swd.as_mut().expect("no SWD target attached");
        f(target)
    }

    pub fn with_jtag<R>(&self, f: impl FnOnce(&mut JtagTap) -> R) -> R {
        let mut st = self.state.borrow_mut();
        let (_, tap) = st.jtag.as_mut().expect("no JTAG TAP attached");
        f(tap)
    }
}

impl GpioController for FakeGpio {
    const MAX_PIN: u8 = FAKE_GPIO_PINS as u8 - 1;

    fn function(&self, pin: u8) -> u8 {
        self.state.borrow().functions[usize::from(pin)]
    }

    fn set_function(&mut self, pin: u8, function: u8) {
        self.state.borrow_mut().functions[usize::from(pin)] = function & 0b111;
    }

    fn write(&mut self, state: PinWrite) {
        let mut st = self.state.borrow_mut();
        let GpioState { functions, driven, writes, swd, jtag, .. } = &mut *st;

        writes.push(state);
        *driven = state.apply(*driven);

        if let Some((swclk, swdio, target)) = swd {
            let host = (functions[usize::from(*swdio)] == FUNCTION_OUTPUT).then_some(bit(*driven, *swdio));
            target.clock(bit(*driven, *swclk), host);
        }
        if let Some((w, tap)) = jtag {
            tap.clock(bit(*driven, w.tck), bit(*driven, w.tms), bit(*driven, w.tdi));
        }
    }

    fn levels(&self) -> u64 {
        let st = self.state.borrow();
        let mut levels = 0;
        for pin in 0..FAKE_GPIO_PINS as u8 {
            let source = if st.functions[usize::from(pin)] == FUNCTION_OUTPUT { st.driven } else { st.inputs };
            levels |= u64::from(bit(source, pin)) << pin;
        }

        let mut inputs = PinWrite::new();
        if let Some((_, swdio, target)) = &st.swd {
            if st.functions[usize::from(*swdio)] != FUNCTION_OUTPUT {
                inputs = inputs.level(Some(*swdio), target.swdio());
            }
        }
        if let Some((w, tap)) = &st.jtag {
            inputs = inputs.level(Some(w.tdo), tap.tdo());
        }
        inputs.apply(levels)
    }
}

/// An offload co-processor running the command protocol against a simulated debug port.
#[derive(Debug, Clone)]
pub struct FakePru {
    ram: Vec<u32>,
    pub registers: TargetRegisters,
    /// Never signal completion.
    pub hang: bool,
    pub commands: Vec<PruCommand>,
    pub sequences: Vec<(usize, Vec<u8>)>,
    pub idle_cycles: u64,
    pub srst_level: Option<bool>,
    pub led: bool,
    pub halted: bool,
}

impl FakePru {
    pub fn new(idcode: u32) -> Self {
        Self {
            ram: vec![0; 2048],
            registers: TargetRegisters::new(idcode),
            hang: false,
            commands: Vec::new(),
            sequences: Vec::new(),
            idle_cycles: 0,
            srst_level: None,
            led: false,
            halted: false,
        }
    }
}

impl Coprocessor for FakePru {
    fn write_word(&mut self, index: usize, value: u32) {
        self.ram[index] = value;
    }

    fn read_word(&self, index: usize) -> u32 {
        self.ram[index]
    }

    fn rendezvous(&mut self, timeout: Duration) -> Result<(), Error> {
        if self.hang {
            return Err(Error::Timeout(timeout));
        }

        let word = self.ram[0];
        let Some(command) = PruCommand::from_word(word) else {
            return Ok(());
        };
        self.commands.push(command);

        let request = ((word >> 8) & 0xff) as u8;
        let delay = u64::from(word >> 24);
        match command {
            PruCommand::Halt => self.halted = true,
            PruCommand::Blink => self.led = self.ram[1] != 0,
            PruCommand::GpioOut => {
                if self.ram[1] & SRST_MASK != 0 {
                    self.srst_level = Some(self.ram[2] != 0);
                }
            }
            PruCommand::GpioIn => self.ram[RESULT_WORD] = 0,
            PruCommand::SigIdle => self.idle_cycles += u64::from(self.ram[1]),
            PruCommand::SigGen => {
                let len = (word >> 8) as usize;
                let bytes = (0..len.div_ceil(8))
                    .map(|i| (self.ram[1 + i / 4] >> (8 * (i % 4))) as u8)
                    .collect();
                self.sequences.push((len, bytes));
            }
            PruCommand::ReadReg => {
                let ack = self.registers.respond(request);
                let (data, parity) = if ack == Ack::OK {
                    self.idle_cycles += delay;
                    self.registers.read(request)
                } else {
                    (0, false)
                };
                self.ram[RESULT_WORD] = u32::from(ack) | u32::from(parity) << 31;
                self.ram[RESULT_WORD + 1] = data;
            }
            PruCommand::WriteReg => {
                let ack = self.registers.respond(request);
                if ack == Ack::OK {
                    self.idle_cycles += delay;
                    self.registers.write(request, self.ram[1], (word >> 16) & 1 == 1);
                }
                self.ram[RESULT_WORD] = u32::from(ack);
            }
        }
        Ok(())
    }

    fn halt(&mut self) {
        self.halted = true;
    }
}
