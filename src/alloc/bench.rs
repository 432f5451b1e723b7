//! Timing checks for the allocator hot paths
