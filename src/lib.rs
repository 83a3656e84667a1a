// MIT License
//
// Copyright (c) 2019-2021 Tobias Pfeiffer
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! Server discovery and monitoring for a MongoDB driver: the topology actor,
//! its monitored server handles, deadline-bounded server selection, and
//! retryable dispatch. The wire codec, connection pooling, and the document
//! serializer live behind the [`wire::Transport`] seam.

#![warn(clippy::all)]
#![forbid(unsafe_code)]

pub use self::{
	common::*,
	cursor::{Cursor, CursorFactory, CursorOptions},
	description::*,
	selection::{Selector, SelectorFn},
	server::Server,
	session::{ClientSession, SessionOptions},
	topology::{SelectServerOptions, Topology}
};

pub mod apm;
pub mod common;
pub mod cursor;
pub mod description;
pub mod selection;
pub mod server;
pub mod session;
pub mod topology;
pub mod wire;

pub static DRIVER_NAME: &str = "mongo-sdam";
