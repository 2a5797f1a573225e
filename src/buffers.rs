// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Buffer objects and their registry.

A [`holder::BufferHolder`] is one persistently mapped GPU buffer together
with the fence state that keeps CPU and GPU accesses to it coherent; the
[`registry::BufferRegistry`] maps opaque handles to holders and owns their
lifecycle.
*/

pub mod holder;
pub mod registry;
pub mod span;
