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
		common::{split_namespace, to_document, CommandOptions, Document, ReadPreference, SdamResult},
		topology::Topology
	},
	std::{collections::VecDeque, sync::Arc},
	serde::{Serialize, Deserialize}
};

/// Replaces the default cursor construction in `Topology::cursor`.
pub type CursorFactory =
	Arc<dyn Fn(&Topology, &str, Document, CursorOptions) -> Cursor + Send + Sync>;

#[derive(Debug, Clone, Default)]
pub struct CursorOptions {
	pub batch_size:      Option<i64>,
	pub max_time_ms:     Option<i64>,
	pub read_preference: Option<ReadPreference>
}

/// A buffered command cursor. Construction is free of I/O; the initial
/// command runs on the first `next()` and batches are then fetched with
/// `getMore` through the topology's dispatch.
#[derive(Debug, Clone)]
pub struct Cursor {
	topology:                    Topology,
	command:                     Option<Document>,
	pub namespace:               String,
	pub cursor_id:               i64,
	pub batch_size:              Option<i64>,
	pub max_time_ms:             Option<i64>,
	pub buffer:                  VecDeque<Document>,
	pub post_batch_resume_token: Option<Document>,
	pub read_preference:         ReadPreference
}

impl Cursor {
	pub fn new(topology: Topology, namespace: String, command: Document, options: CursorOptions) -> Self {
		Self {
			topology,
			command:                 Some(command),
			namespace,
			cursor_id:               0,
			batch_size:              options.batch_size,
			max_time_ms:             options.max_time_ms,
			buffer:                  VecDeque::new(),
			post_batch_resume_token: None,
			read_preference:         options.read_preference.unwrap_or_default()
		}
	}

	fn run(&mut self, command: Document) -> SdamResult<()> {
		let reply = self.topology.command(&self.namespace, command, &CommandOptions {
			read_preference: Some(self.read_preference.clone()),
			..CommandOptions::default()
		})?;
		let result: CursorCommandResult =
			serde_json::from_value(serde_json::Value::Object(reply))?;
		self.buffer.extend(result.cursor.batch.into_iter());
		self.cursor_id = result.cursor.id;
		self.namespace = result.cursor.ns;
		self.post_batch_resume_token = result.cursor.post_batch_resume_token;
		Ok(())
	}
}

impl Iterator for Cursor {
	type Item = SdamResult<Document>;

	fn next(&mut self) -> Option<Self::Item> {
		if let Some(doc) = self.buffer.pop_front() {
			return Some(Ok(doc));
		}
		if let Some(command) = self.command.take() {
			if let Err(e) = self.run(command) {
				return Some(Err(e));
			}
			return self.next();
		}
		if self.cursor_id == 0 {
			return None;
		}

		let get_more = match serde_json::to_value(&GetMoreCommand {
			get_more:    self.cursor_id,
			collection:  split_namespace(&self.namespace).1,
			batch_size:  self.batch_size,
			max_time_ms: self.max_time_ms
		}) {
			Ok(value) => to_document(value),
			Err(e)    => return Some(Err(e.into()))
		};
		if let Err(e) = self.run(get_more) {
			return Some(Err(e));
		}
		self.next()
	}
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GetMoreCommand<'a> {
	get_more:    i64,
	collection:  &'a str,
	#[serde(skip_serializing_if = "Option::is_none")]
	batch_size:  Option<i64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	max_time_ms: Option<i64>
}

#[derive(Debug, Deserialize)]
struct CursorCommandResult {
	cursor: CursorCommandResultCursor
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CursorCommandResultCursor {
	#[serde(alias = "firstBatch", alias = "nextBatch")]
	batch:                   Vec<Document>,
	id:                      i64,
	ns:                      String,
	post_batch_resume_token: Option<Document>
}

#[cfg(test)]
mod tests {
	use {
		super::*,
		crate::{
			common::{ServerSelectionConfig, TopologyOptions, DEFAULT_LOCAL_THRESHOLD},
			cursor::CursorOptions,
			wire::testing::{standalone_reply, MockTransport, Scripted}
		},
		std::time::Duration,
		serde_json::json
	};

	fn topology(transport: Arc<MockTransport>) -> Topology {
		let host = "h:27017".parse().unwrap();
		transport.set_heartbeat(&host, standalone_reply());
		let topology = Topology::new(&[host], TopologyOptions {
			transport: Some(transport),
			server_selection_config: ServerSelectionConfig {
				local_threshold:          DEFAULT_LOCAL_THRESHOLD,
				server_selection_timeout: Duration::from_secs(5),
				heartbeat_frequency:      Duration::from_millis(10),
				min_heartbeat_interval:   Duration::from_millis(1)
			},
			..TopologyOptions::default()
		}).unwrap();
		topology.connect().unwrap();
		topology
	}

	#[test]
	fn construction_sends_nothing() {
		let transport = Arc::new(MockTransport::default());
		let topology = topology(transport.clone());
		let _cursor = topology.cursor("db.c",
			to_document(json!({ "find": "c" })), CursorOptions::default());
		assert!(transport.command_log().is_empty());
	}

	#[test]
	fn iterates_initial_batch_and_get_more() {
		let transport = Arc::new(MockTransport::default());
		let topology = topology(transport.clone());

		transport.push_command_result(Scripted::Reply(to_document(json!({
			"ok": 1,
			"cursor": { "id": 7, "ns": "db.c", "firstBatch": [{ "x": 1 }] }
		}))));
		transport.push_command_result(Scripted::Reply(to_document(json!({
			"ok": 1,
			"cursor": { "id": 0, "ns": "db.c", "nextBatch": [{ "x": 2 }] }
		}))));

		let cursor = topology.cursor("db.c",
			to_document(json!({ "find": "c" })), CursorOptions::default());
		let docs: Vec<Document> = cursor.map(Result::unwrap).collect();
		assert_eq!(docs.len(), 2);
		assert_eq!(docs[0].get("x").and_then(|v| v.as_i64()), Some(1));
		assert_eq!(docs[1].get("x").and_then(|v| v.as_i64()), Some(2));

		let names: Vec<String> = transport.command_log().iter().map(|l| l.name.clone()).collect();
		assert_eq!(names, vec!["find".to_string(), "getMore".to_string()]);
	}

	#[test]
	fn custom_factory_is_used() {
		let factory: CursorFactory = Arc::new(|topology, ns, cmd, _options| {
			Cursor::new(topology.clone(), ns.to_string(), cmd, CursorOptions {
				batch_size: Some(42),
				..CursorOptions::default()
			})
		});
		let topology = Topology::new(&["h:27017".parse().unwrap()], TopologyOptions {
			transport:      Some(Arc::new(MockTransport::default())),
			cursor_factory: Some(factory),
			..TopologyOptions::default()
		}).unwrap();
		let cursor = topology.cursor("db.c",
			to_document(json!({ "find": "c" })), CursorOptions::default());
		assert_eq!(cursor.batch_size, Some(42));
	}
}
