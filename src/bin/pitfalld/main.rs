// Copyright 2024 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! The `pitfalld` daemon: serve one scenario's zones until terminated.

use env_logger::Env;

mod args;
mod run;

fn main() {
    env_logger::init_from_env(Env::new().default_filter_or("info"));
    let args = args::parse();
    match args.command {
        args::Command::Run(run_args) => run::run(run_args),
        args::Command::List(list_args) => run::list(list_args),
    }
}
