// Copyright 2026 Meta-Magic Mount Developers
// SPDX-License-Identifier: GPL-3.0-or-later

pub mod executor;
