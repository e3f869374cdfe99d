// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 kinetis-swd contributors

#![allow(dead_code)]

pub mod kinetis_sim;
pub mod swd_target;
