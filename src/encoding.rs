// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Pass-sequenced command encoding.

Callers request draws, dispatches and blits without knowing about pass
boundaries; the [`pipeline::Pipeline`] turns those requests into a strictly
ordered sequence of well-formed encoding passes on the current command
buffer, and rotates command buffers at flush boundaries.
*/

pub mod pass;
pub mod pipeline;
