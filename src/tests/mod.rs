mod helpers;
mod planner;
