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

use std::sync::LazyLock;

use prometheus::{IntCounterVec, IntGaugeVec, register_int_counter_vec, register_int_gauge_vec};

pub const SINK_LABEL: &str = "sink";

pub static BATCHES_DELIVERED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "ft_batches_delivered_total",
        "Total number of batches delivered by the wrapped sink",
        &[SINK_LABEL]
    )
    .unwrap()
});

pub static DELIVERY_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "ft_delivery_failures_total",
        "Total number of failed delivery attempts",
        &[SINK_LABEL]
    )
    .unwrap()
});

pub static BACKUP_STAGED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "ft_backup_staged_total",
        "Total number of entries staged into the backup queue",
        &[SINK_LABEL]
    )
    .unwrap()
});

pub static BACKUP_STAGE_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "ft_backup_stage_errors_total",
        "Total number of failed attempts to stage into the backup queue",
        &[SINK_LABEL]
    )
    .unwrap()
});

pub static BATCHES_SPLIT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "ft_batches_split_total",
        "Total number of oversized batches split in two",
        &[SINK_LABEL]
    )
    .unwrap()
});

pub static BACKLOG: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    register_int_gauge_vec!(
        "ft_backlog",
        "Entries waiting in the fault-tolerance queues",
        &[SINK_LABEL]
    )
    .unwrap()
});
