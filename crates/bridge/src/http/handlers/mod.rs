// SPDX-License-Identifier: Apache-2.0

pub mod adapters;
pub mod config;
pub mod door;
pub mod events;
pub mod health;
pub mod metrics;
pub mod pairing;
