mod calls;
mod contracts;
mod harness;
mod properties;
mod scenarios;
