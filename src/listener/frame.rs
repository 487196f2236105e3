use std::{collections::VecDeque, mem};

pub const DEFAULT_MAX_FRAME_SIZE: usize = 4096;

/// Incremental netstring (`<len>:<payload>,`) decoder. Accepts arbitrary
/// byte chunks and queues complete frames, buffering partial input across
/// calls. Frames decoded before a malformed byte stay available, so the
/// connection handler can answer them before closing. State is
/// per-connection; a decoder is never shared.
pub struct NetstringDecoder {
    state: State,
    len: usize,
    have_len: bool,
    buf: Vec<u8>,
    frames: VecDeque<Vec<u8>>,
    max_frame_size: usize,
}

enum State {
    Length,
    Payload,
    Terminator,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ProtocolError {
    InvalidLength,
    FrameTooLarge(usize),
    MissingTerminator,
}

impl NetstringDecoder {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            state: State::Length,
            len: 0,
            have_len: false,
            buf: Vec::new(),
            frames: VecDeque::new(),
            max_frame_size,
        }
    }

    pub fn ingest(&mut self, chunk: &[u8]) -> Result<(), ProtocolError> {
        for &byte in chunk {
            match self.state {
                State::Length => match byte {
                    b'0'..=b'9' => {
                        self.len = self.len * 10 + (byte - b'0') as usize;
                        self.have_len = true;
                        if self.len > self.max_frame_size {
                            return Err(ProtocolError::FrameTooLarge(self.len));
                        }
                    }
                    b':' if self.have_len => {
                        if self.len == 0 {
                            self.state = State::Terminator;
                        } else {
                            self.buf.reserve(self.len);
                            self.state = State::Payload;
                        }
                    }
                    _ => return Err(ProtocolError::InvalidLength),
                },
                State::Payload => {
                    self.buf.push(byte);
                    if self.buf.len() == self.len {
                        self.state = State::Terminator;
                    }
                }
                State::Terminator => {
                    if byte != b',' {
                        return Err(ProtocolError::MissingTerminator);
                    }
                    self.frames.push_back(mem::take(&mut self.buf));
                    self.state = State::Length;
                    self.len = 0;
                    self.have_len = false;
                }
            }
        }
        Ok(())
    }

    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        self.frames.pop_front()
    }
}

pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 8);
    frame.extend_from_slice(payload.len().to_string().as_bytes());
    frame.push(b':');
    frame.extend_from_slice(payload);
    frame.push(b',');
    frame
}
