// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The encoder pass state.

Exactly one pass is open at any time, scoped to the currently open command
buffer segment.  The active encoder and its type live in one tagged union,
so they can never disagree (updating a type tag and an encoder handle out of
step was a historical source of bugs in drivers shaped like this one).
*/

use crate::imp::{BlitEncoder, ComputeEncoder, RenderEncoder};

/// Which kind of pass is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassKind {
    None,
    Blit,
    Compute,
    Render,
}

impl std::fmt::Display for PassKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PassKind::None => "none",
            PassKind::Blit => "blit",
            PassKind::Compute => "compute",
            PassKind::Render => "render",
        };
        f.write_str(name)
    }
}

/// The open pass and its native encoder, as one value.
pub enum EncoderState {
    None,
    Blit(Box<dyn BlitEncoder>),
    Compute(Box<dyn ComputeEncoder>),
    Render(Box<dyn RenderEncoder>),
}

impl EncoderState {
    pub fn kind(&self) -> PassKind {
        match self {
            EncoderState::None => PassKind::None,
            EncoderState::Blit(_) => PassKind::Blit,
            EncoderState::Compute(_) => PassKind::Compute,
            EncoderState::Render(_) => PassKind::Render,
        }
    }
}

impl std::fmt::Debug for EncoderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EncoderState::{}", self.kind())
    }
}
