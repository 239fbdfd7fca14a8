mod daily_steps;
mod goals;
mod workouts;
