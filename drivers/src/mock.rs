//! Recording fakes for the bus, control lines, delay and DMA channel

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::convert::Infallible;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{ErrorType as PinErrorType, OutputPin};
use embedded_hal::spi::{ErrorKind, ErrorType as SpiErrorType, SpiBus};

use crate::bus::{DmaChannel, DmaDescriptor, NoDma, SpiTransport};
use crate::Error;

/// Fake address of the SPI transmit register
pub const DATA_REGISTER: usize = 0x4000_3008;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Line {
    DisplayCs,
    TouchCs,
    Dc,
    Reset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Set(Line, bool),
    Write(Vec<u8>),
    Transfer(Vec<u8>),
    Flush,
    DmaConfigure(usize),
    DmaEnable,
    BusyPoll,
    DmaDisable,
    Delay(u32),
}

/// Bus activity folded into display level events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Register(u8, Vec<u8>),
    Delay(u32),
    Reset(bool),
}

type Responder = Box<dyn FnMut(u8) -> u16>;

#[derive(Default)]
struct State {
    ops: Vec<Op>,
    display_selected: bool,
    touch_selected: bool,
    fail_spi: bool,
    touch: Option<Responder>,
    dma_running: bool,
    dma_payload: Vec<u8>,
    dma_issued: usize,
}

#[derive(Clone, Default)]
pub struct Log(Rc<RefCell<State>>);

impl Log {
    pub fn ops(&self) -> Vec<Op> {
        self.0.borrow().ops.clone()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().ops.clear();
    }

    pub fn fail_spi(&self, fail: bool) {
        self.0.borrow_mut().fail_spi = fail;
    }

    /// Answer touch conversions with `responder(command)`
    pub fn set_touch(&self, responder: impl FnMut(u8) -> u16 + 'static) {
        self.0.borrow_mut().touch = Some(Box::new(responder));
    }

    pub fn pin(&self, line: Line) -> MockPin {
        MockPin {
            line,
            log: self.clone(),
        }
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.0
            .borrow()
            .ops
            .iter()
            .filter_map(|op| match op {
                Op::Write(bytes) => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of touch conversions started with `command`
    pub fn touch_reads(&self, command: u8) -> usize {
        self.0
            .borrow()
            .ops
            .iter()
            .filter(|op| matches!(op, Op::Transfer(bytes) if bytes.first() == Some(&command)))
            .count()
    }

    pub fn dma_payload(&self) -> Vec<u8> {
        self.0.borrow().dma_payload.clone()
    }

    pub fn dma_issued(&self) -> usize {
        self.0.borrow().dma_issued
    }

    /// Display registers with their parameters, delays and reset levels, in order
    pub fn transcript(&self) -> Vec<Event> {
        let mut events: Vec<Event> = Vec::new();
        let mut data = false;
        for op in self.0.borrow().ops.iter() {
            match op {
                Op::Set(Line::Dc, level) => data = *level,
                Op::Set(Line::Reset, level) => events.push(Event::Reset(*level)),
                Op::Delay(ms) => events.push(Event::Delay(*ms)),
                Op::Write(bytes) if !data => {
                    for byte in bytes {
                        events.push(Event::Register(*byte, Vec::new()));
                    }
                }
                Op::Write(bytes) => {
                    if let Some(Event::Register(_, params)) = events.last_mut() {
                        params.extend_from_slice(bytes);
                    }
                }
                _ => {}
            }
        }
        events
    }

    /// Register writes only, as `(command, params)`
    pub fn registers(&self) -> Vec<(u8, Vec<u8>)> {
        self.transcript()
            .into_iter()
            .filter_map(|event| match event {
                Event::Register(command, params) => Some((command, params)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, op: Op) {
        self.0.borrow_mut().ops.push(op);
    }
}

pub struct MockSpi {
    log: Log,
}

impl MockSpi {
    fn check(&self) -> Result<(), ErrorKind> {
        let state = self.log.0.borrow();
        assert!(!state.dma_running, "SPI used while DMA owns the bus");
        if state.fail_spi {
            return Err(ErrorKind::Other);
        }
        Ok(())
    }
}

impl SpiErrorType for MockSpi {
    type Error = ErrorKind;
}

impl SpiBus for MockSpi {
    fn read(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        self.check()?;
        words.fill(0);
        self.log.record(Op::Transfer(Vec::new()));
        Ok(())
    }

    fn write(&mut self, words: &[u8]) -> Result<(), Self::Error> {
        self.check()?;
        self.log.record(Op::Write(words.to_vec()));
        Ok(())
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Self::Error> {
        self.check()?;
        read.fill(0);
        {
            let mut state = self.log.0.borrow_mut();
            let command = write.first().copied().unwrap_or(0);
            if state.touch_selected && command & 0x80 != 0 {
                if let Some(responder) = state.touch.as_mut() {
                    let value = responder(command);
                    if command & 0x08 != 0 {
                        if let Some(byte) = read.get_mut(1) {
                            *byte = value as u8;
                        }
                    } else if read.len() >= 3 {
                        read[1] = (value >> 4) as u8;
                        read[2] = ((value & 0x0F) << 4) as u8;
                    }
                }
            }
        }
        self.log.record(Op::Transfer(write.to_vec()));
        Ok(())
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), Self::Error> {
        let write = words.to_vec();
        self.transfer(words, &write)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        self.check()?;
        self.log.record(Op::Flush);
        Ok(())
    }
}

pub struct MockPin {
    line: Line,
    log: Log,
}

impl MockPin {
    fn set(&mut self, level: bool) {
        {
            let mut state = self.log.0.borrow_mut();
            match self.line {
                Line::DisplayCs => state.display_selected = !level,
                Line::TouchCs => state.touch_selected = !level,
                _ => {}
            }
        }
        self.log.record(Op::Set(self.line, level));
    }
}

impl PinErrorType for MockPin {
    type Error = Infallible;
}

impl OutputPin for MockPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.set(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.set(true);
        Ok(())
    }
}

pub struct MockDelay {
    log: Log,
}

impl DelayNs for MockDelay {
    fn delay_ns(&mut self, _ns: u32) {}

    fn delay_ms(&mut self, ms: u32) {
        self.log.record(Op::Delay(ms));
    }
}

/// DMA channel that drains its payload over a fixed number of busy polls
pub struct MockDma {
    log: Log,
    polls: usize,
    remaining: usize,
    count: usize,
}

impl DmaChannel<MockSpi> for MockDma {
    unsafe fn configure(&mut self, descriptor: &DmaDescriptor) {
        // SAFETY: guaranteed by the caller
        let payload =
            unsafe { core::slice::from_raw_parts(descriptor.source as *const u8, descriptor.count) };
        {
            let mut state = self.log.0.borrow_mut();
            state.dma_payload = payload.to_vec();
            state.dma_issued = 0;
        }
        self.count = descriptor.count;
        self.log.record(Op::DmaConfigure(descriptor.count));
    }

    fn enable(&mut self, _bus: &mut MockSpi) {
        self.remaining = self.polls;
        self.log.0.borrow_mut().dma_running = true;
        self.log.record(Op::DmaEnable);
    }

    fn is_busy(&mut self, _bus: &mut MockSpi) -> bool {
        self.log.record(Op::BusyPoll);
        let mut state = self.log.0.borrow_mut();
        if self.remaining > 0 {
            self.remaining -= 1;
            let done = self.polls - self.remaining;
            state.dma_issued = self.count * done / (self.polls + 1);
            true
        } else {
            state.dma_issued = self.count;
            false
        }
    }

    fn disable(&mut self, _bus: &mut MockSpi) -> Result<(), Error> {
        self.log.0.borrow_mut().dma_running = false;
        self.log.record(Op::DmaDisable);
        Ok(())
    }
}

pub type Transport = SpiTransport<MockSpi, MockPin, MockPin, NoDma>;
pub type DmaTransport = SpiTransport<MockSpi, MockPin, MockPin, MockDma>;

pub fn transport() -> (Transport, Log) {
    let log = Log::default();
    let transport = SpiTransport::new(
        MockSpi { log: log.clone() },
        log.pin(Line::DisplayCs),
        log.pin(Line::TouchCs),
        log.pin(Line::Dc),
    )
    .unwrap();
    (transport, log)
}

/// Transport whose DMA channel stays busy for `polls` polls per transfer
pub fn dma_transport(polls: usize) -> (DmaTransport, Log) {
    let (transport, log) = transport();
    let channel = MockDma {
        log: log.clone(),
        polls,
        remaining: 0,
        count: 0,
    };
    (transport.with_dma(channel, DATA_REGISTER), log)
}

pub fn delay(log: &Log) -> MockDelay {
    MockDelay { log: log.clone() }
}
