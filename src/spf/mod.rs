//-
// Copyright (c) 2024, Jason Lingle
//
// This file is part of spfcheck.
//
// spfcheck is free software: you can  redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// spfcheck is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// spfcheck. If not, see <http://www.gnu.org/licenses/>.

//! Sender Policy Framework (RFC 7208).

pub mod decoder;
pub mod eval;
pub mod expand;
pub mod macro_string;
pub mod online;
pub mod semantic;
pub mod state;
pub mod syntax;

pub use decoder::Decoder;
pub use eval::{CheckFlags, CheckResult, Checker, SpfResult};
pub use online::{OnlineDnsLookup, OnlineIssue, OnlineSemanticValidator};
pub use semantic::{Issue, IssueCode, Level, SemanticValidator};
pub use state::Environment;
pub use syntax::Record;
