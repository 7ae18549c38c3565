// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Persistent FIFO queue of byte payloads stored in segment files.

pub mod builder;
pub mod config;
pub mod error;
mod frame;
mod io_worker;
mod meta;
pub mod path;
mod queue;
mod rate;
mod recovery;

pub use builder::QueueBuilder;
pub use config::{MB, QueueConfig};
pub use error::{QueueError, Result};
pub use queue::{BackendQueue, DiskQueue};
