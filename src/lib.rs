//! A keyed virtual DOM runtime in model-update-view style.
//!
//! [`element`]s and [`keyed`] children build immutable [`Html`](`element::Html`) trees.
//! [`diff`](`diff::diff`) turns two trees into a sparse [`Patch`](`patch::Patch`),
//! which the [`Reconciler`](`reconciler::Reconciler`) applies to a [`Document`](`host::Document`).
//! The [`Runtime`](`runtime::Runtime`) ties this to an [`Application`](`runtime::Application`),
//! coalescing renders into animation frames and running [`Effect`](`effect::Effect`)s around paint.
//!
//! Two hosts are included: [`web`] for browsers and [`memory`] for tests and headless rendering.

#![doc(html_root_url = "https://docs.rs/twig-dom/0.0.1")]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

#[cfg(doctest)]
pub mod readme {
	doc_comment::doctest!("../README.md");
}

pub mod attribute;
pub mod diff;
pub mod effect;
pub mod element;
pub mod event;
pub mod events;
pub mod host;
pub mod keyed;
pub mod load;
pub mod memory;
pub mod patch;
pub mod path;
pub mod reconciler;
pub mod runtime;
pub mod vnode;
pub mod web;

pub use effect::{Actions, Effect};
pub use element::Html;
pub use runtime::{Application, Config, Runtime};
