mod support;

mod simulator;
