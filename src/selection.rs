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
		common::{ReadPreference, ReadPreferenceMode, Result},
		description::{ServerDescription, ServerType, TopologyDescription, TopologyType}
	},
	std::{sync::Arc, time::Duration},
	rand::Rng
};

/// A selector maps a topology snapshot to the list of eligible servers. It is
/// pure; raising an error terminates the selection with that error.
pub type SelectorFn = dyn Fn(&TopologyDescription, &[Arc<ServerDescription>])
	-> Result<Vec<Arc<ServerDescription>>> + Send + Sync;

/// Either a caller-supplied selector function, or a read preference adapted
/// to one.
#[derive(Clone)]
pub enum Selector {
	Function(Arc<SelectorFn>),
	ReadPreference(ReadPreference)
}

impl Selector {
	pub fn function(
		f: impl Fn(&TopologyDescription, &[Arc<ServerDescription>])
			-> Result<Vec<Arc<ServerDescription>>> + Send + Sync + 'static
	) -> Self {
		Self::Function(Arc::new(f))
	}

	/// Servers a write can be dispatched to.
	pub fn writable() -> Self {
		Self::Function(Arc::new(|description, candidates| {
			Ok(writable_servers(description, candidates))
		}))
	}

	pub(crate) fn select(
		&self,
		description: &TopologyDescription,
		candidates:  &[Arc<ServerDescription>]
	) -> Result<Vec<Arc<ServerDescription>>> {
		match self {
			Self::Function(f)        => f(description, candidates),
			Self::ReadPreference(rp) => Ok(read_preference_servers(description, candidates, rp))
		}
	}
}

impl Default for Selector {
	fn default() -> Self {
		Self::ReadPreference(ReadPreference::primary())
	}
}

impl From<ReadPreference> for Selector {
	fn from(read_preference: ReadPreference) -> Self {
		Self::ReadPreference(read_preference)
	}
}

impl std::fmt::Debug for Selector {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		match self {
			Self::Function(_)        => f.write_str("Selector::Function"),
			Self::ReadPreference(rp) => f.debug_tuple("Selector::ReadPreference").field(rp).finish()
		}
	}
}

pub fn writable_servers(
	description: &TopologyDescription,
	candidates:  &[Arc<ServerDescription>]
) -> Vec<Arc<ServerDescription>> {
	match description.r#type {
		TopologyType::Single => candidates.iter()
			.filter(|s| s.r#type.is_known())
			.cloned()
			.collect(),
		_ => latency_window(
			candidates.iter().filter(|s| s.r#type.is_writable()).cloned().collect(),
			description.local_threshold)
	}
}

/// Basic mode matching plus the latency window. Staleness and tag-set
/// matching are left to caller-supplied selector functions.
pub fn read_preference_servers(
	description:     &TopologyDescription,
	candidates:      &[Arc<ServerDescription>],
	read_preference: &ReadPreference
) -> Vec<Arc<ServerDescription>> {
	let of_type = |r#type: ServerType| candidates.iter()
		.filter(|s| s.r#type == r#type)
		.cloned()
		.collect::<Vec<_>>();

	match description.r#type {
		TopologyType::Unknown => Vec::new(),
		TopologyType::Single  => candidates.iter()
			.filter(|s| s.r#type.is_known())
			.cloned()
			.collect(),
		TopologyType::Sharded =>
			latency_window(of_type(ServerType::Mongos), description.local_threshold),
		_ => match read_preference.mode {
			ReadPreferenceMode::Primary => of_type(ServerType::RSPrimary),
			ReadPreferenceMode::PrimaryPreferred => {
				let primaries = of_type(ServerType::RSPrimary);
				if primaries.is_empty() {
					latency_window(of_type(ServerType::RSSecondary), description.local_threshold)
				} else {
					primaries
				}
			}
			ReadPreferenceMode::Secondary =>
				latency_window(of_type(ServerType::RSSecondary), description.local_threshold),
			ReadPreferenceMode::SecondaryPreferred => {
				let secondaries = latency_window(
					of_type(ServerType::RSSecondary), description.local_threshold);
				if secondaries.is_empty() { of_type(ServerType::RSPrimary) } else { secondaries }
			}
			ReadPreferenceMode::Nearest => latency_window(
				candidates.iter()
					.filter(|s| matches!(s.r#type, ServerType::RSPrimary | ServerType::RSSecondary))
					.cloned()
					.collect(),
				description.local_threshold)
		}
	}
}

/// Keeps the servers whose round-trip time is within `threshold` of the
/// fastest candidate.
fn latency_window(
	mut servers: Vec<Arc<ServerDescription>>,
	threshold:   Duration
) -> Vec<Arc<ServerDescription>> {
	if let Some(min) = servers.iter().filter_map(|s| s.round_trip_time).min() {
		servers.retain(|s| s.round_trip_time.map_or(false, |rtt| rtt <= min + threshold));
	}
	servers
}

/// Uniform random choice among the selected servers.
pub(crate) fn random_element<T: Clone>(list: &[T]) -> Option<T> {
	match list.len() {
		0 => None,
		1 => Some(list[0].clone()),
		n => Some(list[rand::thread_rng().gen_range(0..n)].clone())
	}
}
