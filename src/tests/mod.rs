//! Binary-level scenario tests: argument parsing and whole-monitor behavior
//! over simulated devices.

mod monitor_tests;
