//
// Copyright 2021 Signal Messenger, LLC
// SPDX-License-Identifier: AGPL-3.0-only
//

pub mod admission;
pub mod audio;
pub mod config;
pub mod media;
pub mod replay;
pub mod session;
pub mod speakers;
