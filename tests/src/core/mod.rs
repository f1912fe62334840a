mod tb;
