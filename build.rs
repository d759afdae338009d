// MPP Node: node coordinating multi-part lightning network payments.
// Written in 2020-2022 by
//     Dr. Maxim Orlovsky <orlovsky@lnp-bp.org>
//
// To the extent possible under law, the author(s) have dedicated all
// copyright and related and neighboring rights to this software to
// the public domain worldwide. This software is distributed without
// any warranty.
//
// You should have received a copy of the MIT License along with this software.
// If not, see <https://opensource.org/licenses/MIT>.

#[macro_use]
extern crate clap;

use std::fs;

use clap::IntoApp;
use clap_complete::generate_to;
use clap_complete::shells::*;

pub mod opts {
    include!("src/opts.rs");
}

pub mod payd {
    include!("src/payd/opts.rs");
}

fn main() {
    let outdir = "./shell";
    fs::create_dir_all(outdir).expect("unable to create shell completions directory");

    let mut app = payd::Opts::into_app();
    let name = app.get_name().to_string();
    generate_to(Bash, &mut app, &name, outdir).expect("unable to generate bash completions");
    generate_to(PowerShell, &mut app, &name, outdir)
        .expect("unable to generate powershell completions");
    generate_to(Zsh, &mut app, &name, outdir).expect("unable to generate zsh completions");
}
