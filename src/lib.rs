//! A BDD style test engine.
//!
//! Tests are collected into a tree of blocks with a [`Context`](context::Context),
//! resolved (skip, only, todo and slow flags are settled) and then executed one
//! unit at a time, while every step is published as an [`Event`](event::Event).

pub mod callback;
pub mod config;
pub mod context;
pub mod event;
pub mod hook;
pub mod options;
pub mod outcome;
pub mod reporter;
pub mod sink;
pub mod tree;

mod engine;
pub use engine::*;

mod run;
pub use run::*;

mod unit;
pub use unit::{HookContext, TestContext};

mod executor;
mod resolver;

pub mod prelude {
    pub use crate::{
        Engine, HookContext, Run, RunReport, StopHandle, TestContext,
        callback::{Callback, Done},
        config::Config,
        context::{CollectError, Context, Modifiers},
        event::{Event, GlobalError},
        options::{NodeOptions, OptionValue},
        outcome::{CancelKind, UnitError},
        reporter::{NoReporter, Reporter, SummaryReporter},
    };
}

#[cfg(test)]
mod test_support;
