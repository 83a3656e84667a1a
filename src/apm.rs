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

use {
	crate::{
		common::{Document, Error, ServerAddress},
		description::{ServerDescription, TopologyDescription}
	},
	std::{sync::Arc, time::Duration}
};

/// Subscribers receive every event the topology emits. Listeners run on the
/// emitting thread and must not call back into the topology.
pub type EventListener = Box<dyn Fn(&Event) + Send + Sync>;

/// The monitoring event stream. Every payload carries the emitting topology's
/// identifier; per-server events also carry the server address.
///
/// For a single description update the emission order is normative:
/// `ServerDescriptionChanged`, any `ServerOpening`/`ServerClosed` caused by
/// reconciliation, then `TopologyDescriptionChanged`.
#[derive(Debug)]
pub enum Event<'a> {
	TopologyOpening {
		topology_id: usize
	},
	TopologyClosed {
		topology_id: usize
	},
	TopologyDescriptionChanged {
		topology_id: usize,
		previous:    Arc<TopologyDescription>,
		new:         Arc<TopologyDescription>
	},
	ServerOpening {
		topology_id: usize,
		address:     &'a ServerAddress
	},
	ServerClosed {
		topology_id: usize,
		address:     &'a ServerAddress
	},
	ServerDescriptionChanged {
		topology_id: usize,
		address:     &'a ServerAddress,
		previous:    Arc<ServerDescription>,
		/// Read from the newly published topology description; `None` when
		/// the update removed the server from the topology.
		new:         Option<Arc<ServerDescription>>
	},
	ServerHeartbeatStarted {
		topology_id: usize,
		address:     &'a ServerAddress
	},
	ServerHeartbeatSucceeded {
		topology_id: usize,
		address:     &'a ServerAddress,
		duration:    Duration,
		reply:       &'a Document
	},
	ServerHeartbeatFailed {
		topology_id: usize,
		address:     &'a ServerAddress,
		duration:    Duration,
		failure:     &'a Error
	},
	CommandStarted {
		topology_id:   usize,
		address:       &'a ServerAddress,
		database_name: &'a str,
		command_name:  Command,
		command:       &'a Document,
		request_id:    usize,
		operation_id:  usize
	},
	CommandSucceeded {
		topology_id:  usize,
		address:      &'a ServerAddress,
		duration:     Duration,
		command_name: Command,
		reply:        &'a Document,
		request_id:   usize,
		operation_id: usize
	},
	CommandFailed {
		topology_id:  usize,
		address:      &'a ServerAddress,
		duration:     Duration,
		command_name: Command,
		failure:      &'a Error,
		request_id:   usize,
		operation_id: usize
	},
	Connect {
		topology_id: usize,
		address:     &'a ServerAddress
	},
	Error {
		topology_id: usize,
		address:     Option<&'a ServerAddress>,
		failure:     &'a Error
	}
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Command {
	Aggregate,
	Count,
	Distinct,
	Delete,
	EndSessions,
	Find,
	FindAndModify,
	GetMore,
	Insert,
	IsMaster,
	KillCursors,
	ListCollections,
	ListDatabases,
	Update,
	Unknown
}

impl From<&str> for Command {
	fn from(s: &str) -> Self {
		use self::Command::*;
		match s {
			"aggregate"       => Aggregate,
			"count"           => Count,
			"distinct"        => Distinct,
			"delete"          => Delete,
			"endSessions"     => EndSessions,
			"find"            => Find,
			"findAndModify"   => FindAndModify,
			"getMore"         => GetMore,
			"insert"          => Insert,
			"isMaster"        => IsMaster,
			"killCursors"     => KillCursors,
			"listCollections" => ListCollections,
			"listDatabases"   => ListDatabases,
			"update"          => Update,
			_                 => Unknown
		}
	}
}
